mod cache;
mod classifier;
mod message;
pub mod types;
mod watcher;

pub use classifier::{Classifier, ClassifierConfig};
pub use watcher::Watcher;
