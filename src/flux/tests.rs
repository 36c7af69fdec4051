use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use crate::observer::Observer;
use crate::scheduler::new_single;
use crate::subscription::subscribe::{Phase, Subscribeable, Subscriber};

use super::Flux;

fn probe<T: Send + 'static>(
    seen: &Arc<Mutex<Vec<T>>>,
    errors: &Arc<AtomicUsize>,
    completions: &Arc<AtomicUsize>,
) -> Subscriber<T> {
    let seen = Arc::clone(seen);
    let errors = Arc::clone(errors);
    let completions = Arc::clone(completions);
    Subscriber::new(
        move |v| seen.lock().unwrap().push(v),
        move |_| {
            errors.fetch_add(1, Ordering::SeqCst);
        },
        move || {
            completions.fetch_add(1, Ordering::SeqCst);
        },
    )
}

#[test]
fn take_stops_consuming_the_source() {
    let pulled = Arc::new(AtomicUsize::new(0));
    let pulled_c = Arc::clone(&pulled);

    let source = Flux::new(move |mut o: Subscriber<i32>| {
        for i in 0.. {
            if o.is_closed() {
                break;
            }
            pulled_c.fetch_add(1, Ordering::SeqCst);
            o.next(i);
        }
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    source.take(3).subscribe(probe(&seen, &errors, &completions));

    assert_eq!(
        &*seen.lock().unwrap(),
        &[0, 1, 2],
        "take(3) should pass through exactly the first three values"
    );
    assert_eq!(
        completions.load(Ordering::SeqCst),
        1,
        "take should synthesize exactly one completion"
    );
    // One extra pull may race the cutoff, the infinite loop must not.
    assert!(
        pulled.load(Ordering::SeqCst) <= 4,
        "source kept emitting after take reached its limit"
    );
}

#[test]
fn take_zero_completes_without_touching_the_source() {
    let subscribed = Arc::new(AtomicUsize::new(0));
    let subscribed_c = Arc::clone(&subscribed);
    let source = Flux::new(move |mut o: Subscriber<i32>| {
        subscribed_c.fetch_add(1, Ordering::SeqCst);
        o.next(1);
        o.complete();
    });

    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    source.take(0).subscribe(probe(&seen, &errors, &completions));

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(
        subscribed.load(Ordering::SeqCst),
        0,
        "take(0) must not subscribe to the upstream at all"
    );
}

#[test]
fn publish_on_closed_scheduler_turns_into_error_signal() {
    let scheduler = new_single();
    scheduler.shutdown();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    let handle = Flux::range(1, 3)
        .publish_on(&scheduler)
        .subscribe(probe(&seen, &errors, &completions));

    assert_eq!(handle.phase(), Phase::Errored);
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[test]
fn subscribe_on_closed_scheduler_turns_into_error_signal() {
    let scheduler = new_single();
    scheduler.shutdown();

    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));
    let seen: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let handle = Flux::range(1, 3)
        .subscribe_on(&scheduler)
        .subscribe(probe(&seen, &errors, &completions));

    assert_eq!(handle.phase(), Phase::Errored);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[test]
fn collect_abandons_buffer_on_error() {
    let source = Flux::new(|mut o: Subscriber<i32>| {
        o.next(1);
        o.next(2);
        o.error(Arc::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "boom",
        )));
    });

    let seen: Arc<Mutex<Vec<Vec<i32>>>> = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    source
        .collect()
        .as_flux()
        .subscribe(probe(&seen, &errors, &completions));

    assert!(
        seen.lock().unwrap().is_empty(),
        "collect must not emit a partial buffer"
    );
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(completions.load(Ordering::SeqCst), 0);
}

#[test]
fn zip_drains_buffered_values_before_completing() {
    let left = Flux::just([1, 2, 3, 4, 5]);
    let right = Flux::just([10, 20]);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let errors = Arc::new(AtomicUsize::new(0));
    let completions = Arc::new(AtomicUsize::new(0));

    left.zip(&right).subscribe(probe(&seen, &errors, &completions));

    assert_eq!(&*seen.lock().unwrap(), &[(1, 10), (2, 20)]);
    assert_eq!(completions.load(Ordering::SeqCst), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[test]
fn block_last_times_out_and_disposes() {
    let outcome = Flux::interval(Duration::from_secs(30)).block_last(Duration::from_millis(50));

    match outcome {
        Err(e) => assert!(
            e.to_string().contains("exceeded timeout"),
            "unexpected error: {e}"
        ),
        Ok(v) => panic!("expected a timeout, got {v:?}"),
    }
}
