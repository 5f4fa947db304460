//! Isolation levels, read-only transactions and timeouts.

use std::time::Duration;
use txnest_testkit::catalog::{self, BOOK, SERIAL};
use txnest_testkit::prelude::*;

fn count_after_sibling_commit(c: &TestCoordinator, isolation: Isolation) -> usize {
    let config = TransactionConfig::required().isolation(isolation);
    c.run(&config, |tx| {
        assert_eq!(tx.count(SERIAL)?, 0);
        catalog::save_serial_in_new_transaction(tx)?;
        tx.count(SERIAL)
    })
    .unwrap()
}

// ========== Isolation ==========

#[test]
fn serializable_does_not_see_sibling_commit() {
    with_coordinator(|c| {
        assert_eq!(count_after_sibling_commit(c, Isolation::Serializable), 0);
        assert_eq!(c.store().count(SERIAL), 1);
    });
}

#[test]
fn read_committed_sees_sibling_commit() {
    with_coordinator(|c| {
        assert_eq!(count_after_sibling_commit(c, Isolation::ReadCommitted), 1);
    });
}

#[test]
fn serializable_snapshot_is_stable_across_reads() {
    with_coordinator(|c| {
        let config = TransactionConfig::required().isolation(Isolation::Serializable);
        c.run(&config, |tx| {
            let before = tx.store_view().pinned_at();
            for id in 10..13 {
                tx.run(&TransactionConfig::requires_new(), |inner| {
                    inner.put(SERIAL, catalog::serial(id, "Sibling", 1));
                    Ok(())
                })?;
                assert_eq!(tx.count(SERIAL)?, 0);
                assert!(tx.find(SERIAL, id)?.is_none());
            }
            assert_eq!(tx.store_view().pinned_at(), before);
            Ok(())
        })
        .unwrap();
        assert_eq!(c.store().count(SERIAL), 3);
    });
}

#[test]
fn serializable_sees_own_flushed_writes() {
    with_coordinator(|c| {
        let config = TransactionConfig::required().isolation(Isolation::Serializable);
        c.run(&config, |tx| {
            tx.put(SERIAL, catalog::serial(1, "Own", 4));
            assert_eq!(tx.count(SERIAL)?, 1);
            assert!(tx.store_view().contains(SERIAL, 1));
            Ok(())
        })
        .unwrap();
    });
}

#[test]
fn joined_context_inherits_isolation() {
    with_coordinator(|c| {
        let outer = TransactionConfig::required().isolation(Isolation::Serializable);
        c.run(&outer, |tx| {
            tx.run(
                &TransactionConfig::required().isolation(Isolation::ReadCommitted),
                |inner| {
                    assert_eq!(inner.isolation(), Isolation::Serializable);
                    Ok(())
                },
            )
        })
        .unwrap();
    });
}

#[test]
fn store_snapshot_view_outside_transactions() {
    with_coordinator(|c| {
        c.store().put(SERIAL, catalog::serial(1, "First", 1)).unwrap();
        let pinned = c.store().snapshot_view(Isolation::Serializable);
        let latest = c.store().snapshot_view(Isolation::ReadCommitted);

        c.store().put(SERIAL, catalog::serial(2, "Second", 2)).unwrap();

        assert_eq!(pinned.count(SERIAL), 1);
        assert_eq!(latest.count(SERIAL), 2);
    });
}

// ========== Read-only ==========

#[test]
fn read_only_discards_writes() {
    with_coordinator(|c| {
        let (result, outcome) = c.run_with_outcome(
            &TransactionConfig::required().read_only(true),
            |tx| {
                tx.put(SERIAL, Record::new(1));
                Ok(())
            },
        );
        assert!(result.is_ok());
        assert!(outcome.is_committed());
        assert_eq!(c.store().count(SERIAL), 0);

        c.run(&TransactionConfig::required(), |tx| {
            tx.put(SERIAL, Record::new(1));
            Ok(())
        })
        .unwrap();
        assert_eq!(c.store().count(SERIAL), 1);
    });
}

#[test]
fn read_only_explicit_flush_does_not_reach_store() {
    with_coordinator(|c| {
        let before = c.store().committed_seq();
        c.run(&TransactionConfig::required().read_only(true), |tx| {
            tx.put(SERIAL, catalog::serial(60, "Read Only", 9));
            assert_eq!(tx.flush()?, 0);
            assert_eq!(tx.store_view().count(SERIAL), 0);
            // Staged writes stay readable to the transaction itself.
            assert!(tx.find(SERIAL, 60)?.is_some());
            Ok(())
        })
        .unwrap();

        assert_eq!(c.store().count(SERIAL), 0);
        assert_eq!(c.store().committed_seq(), before);
    });
}

#[test]
fn joined_context_cannot_lift_read_only() {
    with_coordinator(|c| {
        c.run(&TransactionConfig::required().read_only(true), |tx| {
            tx.run(&TransactionConfig::required().read_only(false), |inner| {
                inner.put(SERIAL, Record::new(1));
                Ok(())
            })
        })
        .unwrap();
        assert_eq!(c.store().count(SERIAL), 0);
    });
}

fn seed_serial_and_book(c: &TestCoordinator) {
    c.run(&TransactionConfig::required(), |tx| {
        tx.put(SERIAL, catalog::serial(1, "OldSerialName", 5));
        tx.put(BOOK, catalog::book(1, "OldBookName", "Author"));
        Ok(())
    })
    .unwrap();
}

fn name(c: &TestCoordinator, table: &str) -> String {
    c.store()
        .get(table, 1)
        .as_ref()
        .and_then(catalog::name_of)
        .map(str::to_owned)
        .unwrap_or_default()
}

#[test]
fn read_only_outer_with_writable_inner() {
    with_coordinator(|c| {
        seed_serial_and_book(c);
        c.run(&TransactionConfig::required().read_only(true), |tx| {
            catalog::rename(tx, SERIAL, 1, "NewSerialName")?;
            catalog::change_book_name(tx, 1, "NewBookName", false)
        })
        .unwrap();

        assert_eq!(name(c, SERIAL), "OldSerialName");
        assert_eq!(name(c, BOOK), "NewBookName");
    });
}

#[test]
fn writable_outer_with_read_only_inner() {
    with_coordinator(|c| {
        seed_serial_and_book(c);
        c.run(&TransactionConfig::required(), |tx| {
            catalog::rename(tx, SERIAL, 1, "NewSerialName")?;
            catalog::change_book_name(tx, 1, "NewBookName", true)
        })
        .unwrap();

        assert_eq!(name(c, SERIAL), "NewSerialName");
        assert_eq!(name(c, BOOK), "OldBookName");
    });
}

#[test]
fn read_only_outer_keeps_name_inner_changes_rating() {
    with_coordinator(|c| {
        c.store()
            .put(SERIAL, catalog::serial(1, "OldSerialName", 5))
            .unwrap();
        c.run(&TransactionConfig::required().read_only(true), |tx| {
            catalog::rename(tx, SERIAL, 1, "NewSerialName")?;
            catalog::change_serial_rating(tx, 1, 10, false)
        })
        .unwrap();

        let serial = c.store().get(SERIAL, 1).unwrap();
        assert_eq!(catalog::name_of(&serial), Some("OldSerialName"));
        assert_eq!(catalog::rating_of(&serial), Some(10));
    });
}

#[test]
fn writable_outer_changes_name_read_only_inner_keeps_rating() {
    with_coordinator(|c| {
        c.store()
            .put(SERIAL, catalog::serial(1, "OldSerialName", 5))
            .unwrap();
        c.run(&TransactionConfig::required(), |tx| {
            catalog::rename(tx, SERIAL, 1, "NewSerialName")?;
            catalog::change_serial_rating(tx, 1, 10, true)
        })
        .unwrap();

        let serial = c.store().get(SERIAL, 1).unwrap();
        assert_eq!(catalog::name_of(&serial), Some("NewSerialName"));
        assert_eq!(catalog::rating_of(&serial), Some(5));
    });
}

// ========== Timeouts ==========

#[test]
fn zero_timeout_fails_before_work() {
    with_coordinator(|c| {
        let mut ran = false;
        let err = c
            .run(&TransactionConfig::required().timeout_secs(0), |tx| {
                ran = true;
                tx.count(SERIAL)
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Timeout { .. }));
        assert!(!ran);
        assert_eq!(c.store().count(SERIAL), 0);
    });
}

#[test]
fn no_timeout_runs_normally() {
    with_coordinator(|c| {
        let count = c
            .run(&TransactionConfig::required(), |tx| tx.count(SERIAL))
            .unwrap();
        assert_eq!(count, 0);
    });
}

#[test]
fn joined_context_ignores_own_zero_timeout() {
    with_coordinator(|c| {
        c.run(&TransactionConfig::required(), |tx| {
            tx.run(&TransactionConfig::required().timeout_secs(0), |inner| {
                inner.count(SERIAL)
            })
        })
        .unwrap();
    });
}

#[test]
fn zero_timeout_on_new_inner_fails_only_inner() {
    with_coordinator(|c| {
        c.run(&TransactionConfig::required(), |tx| {
            tx.put(SERIAL, Record::new(1));
            let inner = tx.run(&TransactionConfig::requires_new().timeout_secs(0), |_| Ok(()));
            assert!(matches!(inner, Err(CoreError::Timeout { .. })));
            Ok(())
        })
        .unwrap();
        assert_eq!(c.store().count(SERIAL), 1);
    });
}

#[test]
fn expired_deadline_fails_store_reads() {
    with_coordinator(|c| {
        let config = TransactionConfig::required().timeout(Duration::from_millis(20));
        let err = c
            .run(&config, |tx| {
                tx.put(SERIAL, Record::new(1));
                std::thread::sleep(Duration::from_millis(40));
                tx.count(SERIAL)
            })
            .unwrap_err();

        assert!(matches!(err, CoreError::Timeout { .. }));
        assert_eq!(c.store().count(SERIAL), 0);
    });
}

#[test]
fn unbounded_timeouts_never_expire() {
    with_coordinator(|c| {
        for config in [
            TransactionConfig::required().timeout(Duration::MAX),
            TransactionConfig::required().timeout_secs(u64::MAX),
        ] {
            c.run(&config, |tx| {
                tx.put(SERIAL, Record::new(1));
                assert_eq!(tx.count(SERIAL)?, 1);
                assert!(tx.find(SERIAL, 2)?.is_none());
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(c.store().count(SERIAL), 1);
    });
}

#[test]
fn coordinator_default_timeout_applies() {
    let c = TestCoordinator::memory_with_config(
        CoordinatorConfig::new().default_timeout(Some(Duration::ZERO)),
    );
    let err = c
        .run(&TransactionConfig::required(), |_| Ok(()))
        .unwrap_err();
    assert!(matches!(err, CoreError::Timeout { .. }));

    c.run(&TransactionConfig::required().timeout_secs(60), |_| Ok(()))
        .unwrap();
}
