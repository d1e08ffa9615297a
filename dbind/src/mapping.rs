//! Row mappers and return shapes
//!
//! A bound query's declared return type decides two things at compile time:
//! how many rows are fetched ([`ReturnStrategy`], via [`QueryReturn`]) and how
//! each raw row becomes a value ([`RowMapper`], via [`RowShape`]).
//!
//! | Return type                     | Strategy                       |
//! |---------------------------------|--------------------------------|
//! | `()`                            | `None`, rows discarded         |
//! | `Vec<T>`                        | `ManyRows`                     |
//! | `Option<T>`                     | `OneRow { required: false }`   |
//! | scalar, map or `FromRow` record | `OneRow { required: true }`    |
//!
//! The default, `Vec<Vec<Value>>`, yields raw tuples. Types outside the table
//! do not compile:
//!
//! ```compile_fail
//! fn needs_return<R: dbind::QueryReturn>() {}
//! needs_return::<Vec<Vec<String>>>();
//! ```
//!
//! Executions only return nothing or a count:
//!
//! ```compile_fail
//! fn needs_count<R: dbind::ExecuteReturn>() {}
//! needs_count::<String>();
//! ```

use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::traits::{ColumnDescriptor, ColumnMap, FromRow, FromValue};
use crate::value::Value;

/// Registry entry a mapper belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperKind {
    Scalar,
    Tuple,
    Map,
    Record,
}

/// Converts one raw row into a declared shape.
pub trait RowMapper: Send + Sync {
    type Output;

    fn kind(&self) -> MapperKind;

    fn map_row(&self, row: Vec<Value>, columns: &[ColumnDescriptor]) -> Result<Self::Output>;
}

/// Single-column rows converted with [`FromValue`].
pub struct ScalarMapper<T>(PhantomData<fn() -> T>);

impl<T> Default for ScalarMapper<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: FromValue> RowMapper for ScalarMapper<T> {
    type Output = T;

    fn kind(&self) -> MapperKind {
        MapperKind::Scalar
    }

    fn map_row(&self, row: Vec<Value>, _columns: &[ColumnDescriptor]) -> Result<T> {
        if row.len() > 1 {
            return Err(Error::TooManyValues(row.len()));
        }
        let value = row
            .into_iter()
            .next()
            .ok_or_else(|| Error::RowDecode("row has no columns".to_string()))?;
        T::from_value(value)
    }
}

/// Rows passed through as-is.
#[derive(Default)]
pub struct TupleMapper;

impl RowMapper for TupleMapper {
    type Output = Vec<Value>;

    fn kind(&self) -> MapperKind {
        MapperKind::Tuple
    }

    fn map_row(&self, row: Vec<Value>, _columns: &[ColumnDescriptor]) -> Result<Vec<Value>> {
        Ok(row)
    }
}

/// Column names zipped with values.
pub struct MapMapper<M>(PhantomData<fn() -> M>);

impl<M> Default for MapMapper<M> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<M: FromIterator<(String, Value)>> RowMapper for MapMapper<M> {
    type Output = M;

    fn kind(&self) -> MapperKind {
        MapperKind::Map
    }

    fn map_row(&self, row: Vec<Value>, columns: &[ColumnDescriptor]) -> Result<M> {
        Ok(columns.iter().map(|c| c.name.clone()).zip(row).collect())
    }
}

/// Record types built from the column map with [`FromRow`].
pub struct RecordMapper<T>(PhantomData<fn() -> T>);

impl<T> Default for RecordMapper<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: FromRow> RowMapper for RecordMapper<T> {
    type Output = T;

    fn kind(&self) -> MapperKind {
        MapperKind::Record
    }

    fn map_row(&self, row: Vec<Value>, columns: &[ColumnDescriptor]) -> Result<T> {
        T::from_row(&ColumnMap::new(row, columns))
    }
}

/// A type one result row can be mapped into.
///
/// `#[derive(FromRow)]` implements this for records.
pub trait RowShape: Sized {
    type Mapper: RowMapper<Output = Self> + Default;
}

/// The mapper registered for `T`.
pub fn row_mapper<T: RowShape>() -> T::Mapper {
    T::Mapper::default()
}

macro_rules! impl_scalar_shape {
    ($($ty:ty),*) => {
        $(
            impl RowShape for $ty {
                type Mapper = ScalarMapper<$ty>;
            }

            impl RowShape for Option<$ty> {
                type Mapper = ScalarMapper<Option<$ty>>;
            }
        )*
    };
}

impl_scalar_shape!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    Vec<u8>,
    NaiveDate,
    NaiveDateTime,
    NaiveTime,
    Decimal,
    serde_json::Value,
    Value
);

impl RowShape for Vec<Value> {
    type Mapper = TupleMapper;
}

impl RowShape for HashMap<String, Value> {
    type Mapper = MapMapper<Self>;
}

impl RowShape for BTreeMap<String, Value> {
    type Mapper = MapMapper<Self>;
}

/// How many rows a query return consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStrategy {
    None,
    OneRow { required: bool },
    ManyRows,
    Stream,
}

/// A type a bound query can return.
pub trait QueryReturn: Sized + Send {
    const STRATEGY: ReturnStrategy;

    /// Build the return value from the rows fetched under [`Self::STRATEGY`].
    fn from_rows(rows: Vec<Vec<Value>>, columns: &[ColumnDescriptor]) -> Result<Self>;
}

impl QueryReturn for () {
    const STRATEGY: ReturnStrategy = ReturnStrategy::None;

    fn from_rows(_rows: Vec<Vec<Value>>, _columns: &[ColumnDescriptor]) -> Result<Self> {
        Ok(())
    }
}

impl<T: RowShape + Send> QueryReturn for Vec<T> {
    const STRATEGY: ReturnStrategy = ReturnStrategy::ManyRows;

    fn from_rows(rows: Vec<Vec<Value>>, columns: &[ColumnDescriptor]) -> Result<Self> {
        let mapper = row_mapper::<T>();
        rows.into_iter()
            .map(|row| mapper.map_row(row, columns))
            .collect()
    }
}

impl<T: RowShape + Send> QueryReturn for Option<T> {
    const STRATEGY: ReturnStrategy = ReturnStrategy::OneRow { required: false };

    fn from_rows(rows: Vec<Vec<Value>>, columns: &[ColumnDescriptor]) -> Result<Self> {
        rows.into_iter()
            .next()
            .map(|row| row_mapper::<T>().map_row(row, columns))
            .transpose()
    }
}

/// Map exactly one row, failing with [`Error::NoRows`] when there is none.
///
/// Used by required single-row returns, including derived records.
pub fn single_row<T: RowShape>(rows: Vec<Vec<Value>>, columns: &[ColumnDescriptor]) -> Result<T> {
    let row = rows.into_iter().next().ok_or(Error::NoRows)?;
    row_mapper::<T>().map_row(row, columns)
}

macro_rules! impl_required_return {
    ($($ty:ty),*) => {
        $(
            impl QueryReturn for $ty {
                const STRATEGY: ReturnStrategy = ReturnStrategy::OneRow { required: true };

                fn from_rows(rows: Vec<Vec<Value>>, columns: &[ColumnDescriptor]) -> Result<Self> {
                    single_row(rows, columns)
                }
            }
        )*
    };
}

// `Vec<u8>` is left out: as a return type it means many `u8` rows.
impl_required_return!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    String,
    NaiveDate,
    NaiveDateTime,
    NaiveTime,
    Decimal,
    serde_json::Value,
    Value,
    HashMap<String, Value>,
    BTreeMap<String, Value>
);

/// What a bound execution returns: nothing, or the affected-row count.
pub trait ExecuteReturn: Sized + Send {
    fn from_affected(rows: u64) -> Result<Self>;
}

impl ExecuteReturn for () {
    fn from_affected(_rows: u64) -> Result<Self> {
        Ok(())
    }
}

macro_rules! impl_count_return {
    ($($ty:ty),*) => {
        $(
            impl ExecuteReturn for $ty {
                fn from_affected(rows: u64) -> Result<Self> {
                    <$ty>::try_from(rows).map_err(|_| Error::TypeConversion {
                        expected: stringify!($ty),
                        actual: format!("affected row count {rows} out of range"),
                    })
                }
            }
        )*
    };
}

impl_count_return!(u64, u32, usize, i64, i32);

/// Pull rows from a blocking cursor according to `strategy`.
pub(crate) fn fetch_rows<C: crate::traits::Cursor + ?Sized>(
    strategy: ReturnStrategy,
    cursor: &mut C,
) -> Result<Vec<Vec<Value>>> {
    match strategy {
        ReturnStrategy::None => Ok(Vec::new()),
        ReturnStrategy::ManyRows | ReturnStrategy::Stream => cursor.fetch_all(),
        ReturnStrategy::OneRow { .. } => {
            if let Some(count) = cursor.row_count().filter(|n| *n > 1) {
                return Err(Error::TooManyRows(count));
            }
            let Some(first) = cursor.fetch_one()? else {
                return Ok(Vec::new());
            };
            if cursor.fetch_one()?.is_some() {
                let rest = cursor.fetch_all()?.len() as u64;
                return Err(Error::TooManyRows(rest + 2));
            }
            Ok(vec![first])
        }
    }
}

/// Async twin of [`fetch_rows`].
pub(crate) async fn fetch_rows_async<C: crate::traits::AsyncCursor + ?Sized>(
    strategy: ReturnStrategy,
    cursor: &mut C,
) -> Result<Vec<Vec<Value>>> {
    match strategy {
        ReturnStrategy::None => Ok(Vec::new()),
        ReturnStrategy::ManyRows | ReturnStrategy::Stream => cursor.fetch_all().await,
        ReturnStrategy::OneRow { .. } => {
            if let Some(count) = cursor.row_count().filter(|n| *n > 1) {
                return Err(Error::TooManyRows(count));
            }
            let Some(first) = cursor.fetch_one().await? else {
                return Ok(Vec::new());
            };
            if cursor.fetch_one().await?.is_some() {
                let rest = cursor.fetch_all().await?.len() as u64;
                return Err(Error::TooManyRows(rest + 2));
            }
            Ok(vec![first])
        }
    }
}
