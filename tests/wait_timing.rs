//! Timing bounds of the polling wait at full scale

use std::time::{Duration, Instant};

use mobile_harness::config::WaitSettings;
use mobile_harness::{Locator, MockDriver, MockElement, MockScreen, Waiter, wait_until};

const TIMEOUT: Duration = Duration::from_secs(2);
const POLL: Duration = Duration::from_millis(500);

#[test]
fn test_predicate_satisfied_at_one_second() {
    let ready_at = Instant::now() + Duration::from_secs(1);
    let start = Instant::now();
    wait_until(TIMEOUT, POLL, "ready after 1s", || {
        Ok((Instant::now() >= ready_at).then_some(()))
    })
    .unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed <= Duration::from_millis(1500), "took {elapsed:?}");
}

#[test]
fn test_never_true_predicate_times_out_within_one_poll() {
    let start = Instant::now();
    let err = wait_until::<(), _>(TIMEOUT, POLL, "never", || Ok(None)).unwrap_err();
    let elapsed = start.elapsed();
    assert!(err.is_timeout());
    assert!(elapsed >= TIMEOUT);
    assert!(elapsed < TIMEOUT + POLL, "took {elapsed:?}");
    assert!(err.to_string().contains("never"));
}

#[test]
fn test_visible_element_after_one_second() {
    let screen = MockScreen::new();
    let locator = Locator::id("com.example.shopping:id/list_title");
    screen.add(
        locator.clone(),
        MockElement::new("Groceries").appears_after(Duration::from_secs(1)),
    );
    let driver = MockDriver::new("s1", screen);
    let waiter = Waiter::new(WaitSettings {
        timeout: TIMEOUT,
        poll_interval: POLL,
        ..WaitSettings::defaults()
    });

    let start = Instant::now();
    waiter.visible(&driver, &locator).unwrap();
    assert!(start.elapsed() <= Duration::from_millis(1500));
}
