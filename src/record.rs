use crate::error::{CacheError, CacheResult};
use sqlx::MySql;
use sqlx::mysql::MySqlRow;
use sqlx::query_builder::Separated;

/// Structural contract of a cached row type.
///
/// Field 0 is the owner id (`sid`), the primary partition key. Up to two more
/// `u32` key parts may follow, in declaration order. `COLUMNS` lists the
/// persisted columns in declaration order with skipped fields omitted; the
/// first `KEY_ARITY` columns form the primary key.
///
/// Implementations bind every column of `COLUMNS`, in order, in `push_binds`.
pub trait Record:
    Clone + Send + Sync + Unpin + for<'r> sqlx::FromRow<'r, MySqlRow> + 'static
{
    /// Logical table name.
    const TABLE: &'static str;

    /// Column names of the persisted fields, in declaration order.
    const COLUMNS: &'static [&'static str];

    /// Primary-key arity including the owner id (1, 2 or 3).
    const KEY_ARITY: usize;

    /// Owner id, field 0.
    fn owner_id(&self) -> u32;

    /// Second key part (arity >= 2).
    fn key2(&self) -> u32 {
        0
    }

    /// Third key part (arity == 3).
    fn key3(&self) -> u32 {
        0
    }

    fn push_binds(&self, b: &mut Separated<'_, '_, MySql, &'static str>);

    fn key(&self) -> RecordKey {
        RecordKey {
            sid: self.owner_id(),
            key2: self.key2(),
            key3: self.key3(),
        }
    }

    /// Primary-key columns, the leading `KEY_ARITY` entries of `COLUMNS`.
    fn key_columns() -> &'static [&'static str] {
        &Self::COLUMNS[..Self::KEY_ARITY]
    }
}

/// Composite key of one record, carried from the change scan to the bulk
/// delete builder. Unused trailing parts stay zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub sid: u32,
    pub key2: u32,
    pub key3: u32,
}

impl RecordKey {
    /// The first `arity` key parts, owner id first.
    pub fn parts(&self, arity: usize) -> impl Iterator<Item = u32> {
        [self.sid, self.key2, self.key3].into_iter().take(arity)
    }
}

/// Primary-key arity, validated at container registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyArity {
    /// One row per owner.
    Single,
    /// `k2 -> record`.
    Double,
    /// `(k2, k3) -> record`.
    Triple,
}

impl KeyArity {
    pub fn of<R: Record>() -> CacheResult<Self> {
        match R::KEY_ARITY {
            1 => Ok(KeyArity::Single),
            2 => Ok(KeyArity::Double),
            3 => Ok(KeyArity::Triple),
            arity => Err(CacheError::UnsupportedKeyArity {
                table: R::TABLE,
                arity,
            }),
        }
    }

    pub fn key_parts(self) -> usize {
        match self {
            KeyArity::Single => 1,
            KeyArity::Double => 2,
            KeyArity::Triple => 3,
        }
    }
}
