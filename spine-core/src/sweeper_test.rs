#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use crate::sweeper::{DeadlineTable, SweeperHandle};

    #[test]
    fn drain_returns_only_expired_entries() {
        let table: DeadlineTable<&str, u32> = DeadlineTable::new();
        let now = Instant::now();
        table.touch("stale", 1, now - Duration::from_secs(1));
        table.touch("due", 2, now);
        table.touch("fresh", 3, now + Duration::from_secs(30));

        let mut drained = table.drain_expired(now);
        drained.sort();
        assert_eq!(drained, vec![("due", 2), ("stale", 1)]);
        assert_eq!(table.len(), 1);
        assert!(table.deadline(&"fresh").is_some());
    }

    #[test]
    fn touch_refreshes_the_deadline() {
        let table: DeadlineTable<u32, ()> = DeadlineTable::default();
        let now = Instant::now();
        table.touch(1, (), now);
        table.touch(1, (), now + Duration::from_secs(10));
        assert_eq!(table.len(), 1);
        assert!(table.drain_expired(now).is_empty());
        assert_eq!(table.deadline(&1), Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn remove_forgets_the_entry() {
        let table: DeadlineTable<u32, &str> = DeadlineTable::new();
        table.touch(1, "a", Instant::now());
        assert_eq!(table.remove(&1), Some("a"));
        assert_eq!(table.remove(&1), None);
        assert!(table.is_empty());
    }

    #[test]
    fn sweeper_runs_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let sweeper = SweeperHandle::spawn("test", Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(sweeper.name(), "test");

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        sweeper.stop();

        let stopped_at = ticks.load(Ordering::SeqCst);
        assert!(stopped_at >= 2);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn dropping_the_handle_stops_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let sweeper = SweeperHandle::spawn("dropped", Duration::from_millis(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        drop(sweeper);
        let after = ticks.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after);
    }
}
