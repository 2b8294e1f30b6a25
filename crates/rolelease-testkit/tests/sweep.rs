//! Reconciliation sweep behavior over hours and days of paused time.

use std::time::Duration;

use rolelease_core::{GrantPolicy, DAY_MS, HOUR_MS, MINUTE_MS};
use rolelease_store::GrantStore;
use rolelease_testkit::fixtures::{advance, key, TestFixture, T0};

const D: i64 = 50 * DAY_MS;

#[tokio::test(start_paused = true)]
async fn test_hourly_sweeps_over_two_days_send_at_most_two_reminders() {
    let fx = TestFixture::new();
    // Three days left: inside the five-day reminder window.
    fx.seed("1", T0 - D + 3 * DAY_MS).await;
    let sweep = fx.sweep();

    let mut reminded = 0;
    for _ in 0..48 {
        reminded += sweep.run_once(fx.now()).await.reminded;
        advance(HOUR_MS).await;
    }

    assert_eq!(reminded, 2);
    assert_eq!(fx.sink.sent_to("1").len(), 2);
    let row = fx.row("1").await.unwrap();
    assert!(row.last_reminded_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_running_sweep_loop_rate_limits_reminders() {
    let fx = TestFixture::new();
    fx.seed("1", T0 - D + 3 * DAY_MS).await;

    let sweep = fx.sweep();
    assert_eq!(sweep.period(), Duration::from_secs(3600));
    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        sweep
            .run_until(async {
                let _ = stopped.await;
            })
            .await;
    });

    // Ticks at 0h, 1h, ..., 47h.
    advance(47 * HOUR_MS + 30 * MINUTE_MS).await;
    stop.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(fx.sink.sent_to("1").len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_no_reminder_outside_threshold() {
    let fx = TestFixture::new();
    fx.grant("1").await;

    let report = fx.sweep().run_once(fx.now()).await;
    assert_eq!(report.reminded, 0);
    assert_eq!(report.rearmed, 0);
    assert!(fx.sink.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_renewal_resets_reminder_state() {
    let fx = TestFixture::new();
    fx.seed("1", T0 - D + 2 * DAY_MS).await;
    let sweep = fx.sweep();

    assert_eq!(sweep.run_once(fx.now()).await.reminded, 1);
    assert!(fx.row("1").await.unwrap().last_reminded_at.is_some());

    fx.grant("1").await;
    assert_eq!(fx.row("1").await.unwrap().last_reminded_at, None);

    // 52 days left now: no reminder until the window is reached again.
    assert_eq!(sweep.run_once(fx.now()).await.reminded, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reminders_then_expiry() {
    let fx = TestFixture::new();
    fx.seed("1", T0 - D + 2 * DAY_MS).await;
    let sweep = fx.sweep();

    for _ in 0..(2 * 24 + 2) {
        sweep.run_once(fx.now()).await;
        advance(HOUR_MS).await;
    }

    let messages = fx.sink.sent_to("1");
    assert_eq!(messages.len(), 3, "{messages:?}");
    assert!(messages[0].starts_with("Your renewal expires at"));
    assert!(messages[2].contains("expired"));
    assert!(fx.row("1").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_custom_policy_window() {
    let fx = TestFixture::with_policy(GrantPolicy {
        grant_duration_days: 10,
        reminder_threshold_days: 20,
        reminder_interval_hours: 6,
        ..GrantPolicy::default()
    });
    fx.grant("1").await;
    let sweep = fx.sweep();

    let mut reminded = 0;
    for _ in 0..24 {
        reminded += sweep.run_once(fx.now()).await.reminded;
        advance(HOUR_MS).await;
    }
    assert_eq!(reminded, 4);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_leaves_renewed_timer_alone() {
    let fx = TestFixture::new();
    fx.grant("1").await;
    fx.grant("1").await;

    let report = fx.sweep().run_once(fx.now()).await;
    assert_eq!(report.rearmed, 0);
    assert_eq!(fx.engine.armed_deadline(&key("1")), Some(T0 + 2 * D));
    assert_eq!(fx.store.scan_all().await.unwrap().len(), 1);
}
