mod entity;
mod query;
mod record;
mod sort_value;

pub use entity::EntityType;
pub use query::{Filter, FilterOp, QuerySpec, QuerySpecBuilder, DEFAULT_SORT_KEY, MAX_PAGE_SIZE};
pub use record::{HeaderItem, ItemId, Record};
pub use sort_value::SortValue;
