use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub mod db;
pub mod notifications;
pub mod profile;
pub mod step_payload;
pub mod submission;
pub mod task;
