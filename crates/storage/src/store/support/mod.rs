#![forbid(unsafe_code)]

mod schema;
mod text;

pub(super) use schema::migrate_schema;
pub(super) use text::tail_utf8;

pub(super) use qc_core::timeutil::now_ms;
