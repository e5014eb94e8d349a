use std::fmt;
use std::time::Duration;

// ============================================================================
// Store Errors
// ============================================================================
//
// Every database failure names the step it came from, so a log line alone is
// enough to tell whether the header, a child table or the commit broke.
//
// ============================================================================

pub type Result<T> = std::result::Result<T, StoreError>;

/// The statement or transaction step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Connect,
    Begin,
    SetIsolation,
    UpsertOrder,
    UpsertDelivery,
    UpsertPayment,
    UpsertItems,
    DeleteStaleItems,
    ReadOrder,
    ReadDelivery,
    ReadPayment,
    ReadItems,
    Commit,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Connect => "connect",
            Step::Begin => "begin transaction",
            Step::SetIsolation => "set isolation level",
            Step::UpsertOrder => "upsert order",
            Step::UpsertDelivery => "upsert delivery",
            Step::UpsertPayment => "upsert payment",
            Step::UpsertItems => "upsert items",
            Step::DeleteStaleItems => "delete stale items",
            Step::ReadOrder => "read order",
            Step::ReadDelivery => "read delivery",
            Step::ReadPayment => "read payment",
            Step::ReadItems => "read items",
            Step::Commit => "commit",
        };
        f.write_str(name)
    }
}

/// Child entities that must exist for an order to be complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Delivery,
    Payment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Delivery => f.write_str("delivery"),
            Entity::Payment => f.write_str("payment"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("order not found: {0}")]
    NotFound(String),

    #[error("{entity} not found for order {order_uid}")]
    MissingEntity { order_uid: String, entity: Entity },

    #[error("{step} failed: {source}")]
    Database {
        step: Step,
        #[source]
        source: sqlx::Error,
    },

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub(crate) fn at(step: Step) -> impl FnOnce(sqlx::Error) -> StoreError {
        move |source| StoreError::Database { step, source }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::MissingEntity { .. })
    }

    pub fn step(&self) -> Option<Step> {
        match self {
            StoreError::Database { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Whether retrying the same operation later can succeed.
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl IsTransient for sqlx::Error {
    fn is_transient(&self) -> bool {
        match self {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            sqlx::Error::Database(db) => matches!(
                db.code().as_deref(),
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
            ),
            _ => false,
        }
    }
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Database { source, .. } => source.is_transient(),
            StoreError::Timeout { .. } => true,
            StoreError::NotFound(_)
            | StoreError::MissingEntity { .. }
            | StoreError::Migration(_) => false,
        }
    }
}
