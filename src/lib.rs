pub mod batch;
pub mod blob;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod guard;
pub mod keys;
pub mod output;
pub mod s3;
pub mod store;
pub mod task;
