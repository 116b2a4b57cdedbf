// SPDX-License-Identifier: Apache-2.0

//! Filter, sort, and paginate engine plus the service-graph deriver. The
//! engine is pure: it consumes record slices and query descriptors and
//! produces result pages, holding no state of its own.

pub mod filter;
pub mod params;
pub mod topology;

pub use filter::{filter_logs, filter_metrics, filter_spans, QueryResult};
pub use params::{
    LogQuery, MetricQuery, Pagination, QueryParams, SortKey, SortOrder, TimeRange, TraceQuery,
};
