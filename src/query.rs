//! Range queries over a coin's time-series collection.
//!
//! A [`SeriesQuery`] names one remote collection and carries the only filter
//! the refresh path needs: a lower bound on the indexed time field, an order
//! and a result-count limit. Sources translate it to their own wire format;
//! [`SeriesQuery::build_sql`] renders it for DuckDB-backed sources with every
//! value bound through `?` placeholders.
//!
//! # Example
//!
//! ```rust
//! use market_mirror::{RangeId, SeriesKey, SeriesQuery};
//! use chrono::{TimeZone, Utc};
//!
//! let key = SeriesKey::history("BTCUSDT", RangeId::Hour24);
//! let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
//! let (sql, params) = SeriesQuery::for_key(&key).after(since).limit(50).build_sql("documents");
//! assert!(sql.contains("\"time\" > ?"));
//! assert_eq!(params.len(), 2);
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config;
use crate::models::SeriesKey;

/// Fixed-width RFC 3339 rendering, so string order equals time order.
pub fn canonical_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASC",
            Direction::Descending => "DESC",
        }
    }
}

/// Lower bound on the time field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBound {
    /// `time > t`, used for incremental tail fetches.
    After(DateTime<Utc>),
    /// `time >= t`, used for window fetches.
    AtOrAfter(DateTime<Utc>),
}

impl TimeBound {
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            TimeBound::After(t) | TimeBound::AtOrAfter(t) => *t,
        }
    }

    pub fn as_sql_op(&self) -> &'static str {
        match self {
            TimeBound::After(_) => ">",
            TimeBound::AtOrAfter(_) => ">=",
        }
    }
}

/// One-shot query against a coin's series collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesQuery {
    coin: String,
    collection: String,
    bound: Option<TimeBound>,
    direction: Direction,
    limit: Option<usize>,
}

impl SeriesQuery {
    /// Query the `collection` subcollection of `coin`, ascending, unbounded.
    pub fn new(coin: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            coin: coin.into(),
            collection: collection.into(),
            bound: None,
            direction: Direction::Ascending,
            limit: None,
        }
    }

    /// Query the collection backing `key`.
    pub fn for_key(key: &SeriesKey) -> Self {
        Self::new(key.coin.clone(), key.kind.collection())
    }

    /// Only points strictly newer than `time`.
    pub fn after(mut self, time: DateTime<Utc>) -> Self {
        self.bound = Some(TimeBound::After(time));
        self
    }

    /// Only points at or after `time`.
    pub fn since(mut self, time: DateTime<Utc>) -> Self {
        self.bound = Some(TimeBound::AtOrAfter(time));
        self
    }

    pub fn order(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Set the maximum number of documents to return.
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn coin(&self) -> &str {
        &self.coin
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn bound(&self) -> Option<TimeBound> {
        self.bound
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    /// Document path of the parent coin, e.g. `crypto_prices/BTCUSDT`.
    pub fn parent_path(&self) -> String {
        format!("{}/{}", config::ROOT_COLLECTION, self.coin)
    }

    /// Full collection path, e.g. `crypto_prices/BTCUSDT/history_yahoo`.
    pub fn collection_path(&self) -> String {
        format!("{}/{}", self.parent_path(), self.collection)
    }

    /// Render against a `(collection, time, doc)` table.
    ///
    /// Returns `(sql, params)`; the limit is inlined as it is not user text.
    pub fn build_sql(&self, table: &str) -> (String, Vec<String>) {
        let mut where_clauses = vec!["collection = ?".to_string()];
        let mut params = vec![self.collection_path()];

        if let Some(bound) = self.bound {
            where_clauses.push(format!("\"{}\" {} ?", config::TIME_FIELD, bound.as_sql_op()));
            params.push(canonical_time(bound.instant()));
        }

        let mut parts = vec![
            "SELECT doc".to_string(),
            format!("FROM {}", table),
            format!("WHERE {}", where_clauses.join(" AND ")),
            format!("ORDER BY \"{}\" {}", config::TIME_FIELD, self.direction.as_sql()),
        ];

        if let Some(n) = self.limit {
            parts.push(format!("LIMIT {}", n));
        }

        (parts.join("\n"), params)
    }
}
