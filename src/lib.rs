//! # Restar
//!
//! Restar puts an ActiveRecord-style query layer on top of paginated REST
//! APIs. Queries are written the way an ORM query is written (filters,
//! sorts, relation joins, limit and offset) and compiled into the URI,
//! headers and query string the backend understands. Responses come back
//! as schema-checked models.
//!
//! ## What's inside
//!
//! ### Query compilation
//! Filter expressions compile into the backend's native operator
//! vocabulary (`eq`, `neq`, `lt`, `gt`, `lte`, `gte`, `in`, `nin`, `like`,
//! `not`, `and`, `or`) and are sent as bracketed query parameters:
//! `filter[status][eq]=open&filter[id][in][0]=1`. Joins do not run on the
//! server; they only ask it to expand related resources inline.
//!
//! ```rust,ignore
//! let orders = Order::find()
//!     .filter(Condition::eq("status", "open"))
//!     .join_with(["customer", "items.product"])
//!     .order_by("created_at", SortDirection::Desc)
//!     .limit(120)
//!     .all(&connection)
//!     .await?;
//! ```
//!
//! ### Pagination
//! A [`cursor::PageCursor`] replays a query page by page, following the
//! `X-Pagination-*` headers of each response and stopping at the last page
//! or at the query's limit, whichever comes first.
//!
//! ### Retries
//! Rate-limited and unavailable responses (429, 500, 503) can be retried
//! with exponential backoff that honours `Retry-After`. Retries are off by
//! default, bounded by a retry count and a total wait budget, and abortable
//! through a cancellation token.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use restar::{Connection, ConnectionConfig, Resource, RetryPolicy, Schema};
//!
//! static CUSTOMER: Schema = Schema::new("Customer", &["id", "name", "email"]);
//!
//! struct Customer;
//! impl Resource for Customer {
//!     fn schema() -> &'static Schema {
//!         &CUSTOMER
//!     }
//! }
//!
//! let connection = Connection::http(
//!     ConnectionConfig::new("https://api.example.com/v1")
//!         .with_retry(RetryPolicy::enabled().with_max_retries(3)),
//! )?
//! .with_auth(Auth::bearer(token));
//!
//! let customer = Customer::find().where_eq("id", 42).one(&connection).await?;
//! ```
//!
//! ## Observability
//!
//! Requests are logged through `tracing` and timed through `metrics`:
//! `restar.request.duration_ms` (histogram, by method) and
//! `restar.request.retries` (counter, by error kind).

pub mod adapters;
pub mod auth;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
mod materialize;
pub mod pagination;
pub mod provider;
pub mod query;
pub mod record;
pub mod response;

pub use crate::adapters::{HttpRequest, Method, Transport, http::HttpTransport, memory::MemoryTransport};
pub use crate::auth::{Auth, Credential};
pub use crate::config::ConnectionConfig;
pub use crate::connection::{Command, Connection, RetryPolicy};
pub use crate::cursor::{CursorState, PageCursor, RecordSet, RowKey};
pub use crate::error::{Error, HttpError, HttpErrorKind, Result};
pub use crate::pagination::{PaginationHeaders, PaginationState};
pub use crate::provider::{DataPage, DataProvider};
pub use crate::query::{
    Action, ComparisonOp, Condition, Connective, IndexBy, JoinDirective, Params, Query,
    QueryParams, RequestBuilder, RequestDescriptor, SortDirection,
};
pub use crate::record::{Model, Related, Relation, Resource, Schema};
pub use crate::response::RestResponse;
