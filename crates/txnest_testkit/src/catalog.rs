//! A serial and book catalog built from nested units of work.
//!
//! Every operation here is its own transactional boundary, run through the
//! caller's [`Tx`]. Most join the caller's transaction; the `*_in_new_*`
//! and `change_*` helpers open their own.

use tracing::debug;
use txnest_core::{
    CoreError, CoreResult, ErrorKind, Record, Store, TransactionConfig, Tx, Value,
};

/// Serial table.
pub const SERIAL: &str = "serial";
/// Book table.
pub const BOOK: &str = "book";

/// Raised when a delete targets a record that does not exist.
pub const EMPTY_RESULT: &str = "empty_result";
/// Raised by the helpers that simulate a recoverable data access failure.
pub const RECOVERABLE: &str = "recoverable";

/// Topic of the event published when a serial is created.
pub const SERIAL_CREATED: &str = "serial.created";

/// Rating bounds enforced by the serial table.
pub const RATING_RANGE: std::ops::RangeInclusive<i64> = 0..=10;

/// Error kind of [`EMPTY_RESULT`].
pub const EMPTY_RESULT_KIND: ErrorKind = ErrorKind::Domain(EMPTY_RESULT);
/// Error kind of [`RECOVERABLE`].
pub const RECOVERABLE_KIND: ErrorKind = ErrorKind::Domain(RECOVERABLE);

/// Registers the serial rating constraint on `store`.
pub fn install_constraints(store: &Store) {
    store.add_constraint(SERIAL, "rating_range", |record| {
        match record.get("rating").and_then(Value::as_integer) {
            Some(rating) if !RATING_RANGE.contains(&rating) => Err(format!(
                "rating {rating} outside {}..={}",
                RATING_RANGE.start(),
                RATING_RANGE.end()
            )),
            _ => Ok(()),
        }
    });
}

/// Builds a serial record.
pub fn serial(id: u64, name: &str, rating: i64) -> Record {
    Record::new(id).with("name", name).with("rating", rating)
}

/// Builds a book record.
pub fn book(id: u64, name: &str, author: &str) -> Record {
    Record::new(id).with("name", name).with("author", author)
}

/// Returns the `name` field.
pub fn name_of(record: &Record) -> Option<&str> {
    record.get("name").and_then(Value::as_text)
}

/// Returns the `rating` field.
pub fn rating_of(record: &Record) -> Option<i64> {
    record.get("rating").and_then(Value::as_integer)
}

fn recoverable() -> CoreError {
    CoreError::domain(RECOVERABLE, "recoverable data access failure")
}

// ========== Serial operations (join the caller) ==========

/// Creates a serial and queues a [`SERIAL_CREATED`] event for after commit.
pub fn create_serial(tx: &mut Tx<'_>, id: u64, name: &str, rating: i64) -> CoreResult<Record> {
    tx.run(&TransactionConfig::required(), |tx| {
        let record = serial(id, name, rating);
        tx.publish(SERIAL_CREATED, Some(record.clone()));
        tx.put(SERIAL, record.clone());
        Ok(record)
    })
}

/// Sets the rating of a serial if it exists.
pub fn update_rating(tx: &mut Tx<'_>, id: u64, rating: i64) -> CoreResult<()> {
    tx.run(&TransactionConfig::required(), |tx| {
        if let Some(mut record) = tx.find(SERIAL, id)? {
            record.set("rating", rating);
            tx.put(SERIAL, record);
        }
        Ok(())
    })
}

/// Deletes a serial. Fails with [`EMPTY_RESULT`] if there is none.
pub fn delete_serial(tx: &mut Tx<'_>, id: u64) -> CoreResult<()> {
    tx.run(&TransactionConfig::required(), |tx| {
        if tx.find(SERIAL, id)?.is_none() {
            return Err(CoreError::domain(
                EMPTY_RESULT,
                format!("no serial with id {id} exists"),
            ));
        }
        tx.delete(SERIAL, id);
        Ok(())
    })
}

/// Updates one serial's rating, then deletes another.
pub fn update_rating_and_delete(
    tx: &mut Tx<'_>,
    update_id: u64,
    rating: i64,
    delete_id: u64,
) -> CoreResult<()> {
    update_rating(tx, update_id, rating)?;
    delete_serial(tx, delete_id)
}

// ========== Failing helpers ==========

/// Joins the caller and fails with [`RECOVERABLE`].
pub fn fail_recoverable(tx: &mut Tx<'_>) -> CoreResult<()> {
    tx.run(&TransactionConfig::required(), |_| Err(recoverable()))
}

/// Joins the caller and fails with [`RECOVERABLE`], which this boundary
/// tolerates.
pub fn fail_recoverable_tolerated(tx: &mut Tx<'_>) -> CoreResult<()> {
    let config = TransactionConfig::required().no_rollback_for(RECOVERABLE_KIND);
    tx.run(&config, |_| Err(recoverable()))
}

/// Fails with [`RECOVERABLE`] inside a transaction of its own.
pub fn fail_recoverable_in_new_transaction(tx: &mut Tx<'_>) -> CoreResult<()> {
    tx.run(&TransactionConfig::requires_new(), |_| Err(recoverable()))
}

// ========== Independent transactions ==========

/// Saves serial 1 in a transaction of its own.
pub fn save_serial_in_new_transaction(tx: &mut Tx<'_>) -> CoreResult<()> {
    tx.run(&TransactionConfig::requires_new(), |tx| {
        tx.put(SERIAL, Record::new(1));
        Ok(())
    })
}

/// Renames a book in a transaction of its own.
pub fn change_book_name(tx: &mut Tx<'_>, id: u64, name: &str, read_only: bool) -> CoreResult<()> {
    let config = TransactionConfig::requires_new().read_only(read_only);
    tx.run(&config, |tx| rename(tx, BOOK, id, name))
}

/// Sets a serial's rating in a transaction of its own.
pub fn change_serial_rating(
    tx: &mut Tx<'_>,
    id: u64,
    rating: i64,
    read_only: bool,
) -> CoreResult<()> {
    let config = TransactionConfig::requires_new().read_only(read_only);
    tx.run(&config, |tx| {
        if let Some(mut record) = tx.find(SERIAL, id)? {
            record.set("rating", rating);
            tx.put(SERIAL, record);
        }
        Ok(())
    })
}

/// Renames a record of `table` in the current transaction.
pub fn rename(tx: &mut Tx<'_>, table: &str, id: u64, name: &str) -> CoreResult<()> {
    if let Some(mut record) = tx.find(table, id)? {
        debug!(table, id, name, "renaming record");
        record.set("name", name);
        tx.put(table, record);
    }
    Ok(())
}
