pub mod assemble;
pub mod category;
pub mod collision;
pub mod config;
pub mod diagnostics;
pub mod document;
pub mod ledger;
pub mod link;
pub mod page;
pub mod pipeline;
pub mod runtime;
pub mod source;
pub mod space;
pub mod storage;
pub mod submit;
pub mod transcode;
pub mod wikitext;
