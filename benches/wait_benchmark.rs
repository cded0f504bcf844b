use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mobile_harness::config::WaitSettings;
use mobile_harness::{Locator, MockDriver, MockElement, MockScreen, Waiter};

fn benchmark_waits(c: &mut Criterion) {
    let screen = MockScreen::new();
    let locator = Locator::id("com.example.shopping:id/title");
    screen.add(locator.clone(), MockElement::new("Groceries"));
    let driver = MockDriver::new("bench", screen);
    let waiter = Waiter::new(WaitSettings {
        timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(1),
        settle: Duration::ZERO,
        page_settle: Duration::ZERO,
        probe_timeout: Duration::from_millis(10),
    });

    c.bench_function("wait_visible_immediate", |b| {
        b.iter(|| {
            let result = waiter.visible(&driver, black_box(&locator));
            assert!(result.is_ok());
        })
    });

    c.bench_function("text_of_immediate", |b| {
        b.iter(|| {
            let text = waiter.text_of(&driver, black_box(&locator));
            assert!(text.is_ok());
        })
    });
}

criterion_group!(benches, benchmark_waits);
criterion_main!(benches);
