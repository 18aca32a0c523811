//! Corpus splitting, model fitting, evaluation and hyperparameter search

mod encoder;
mod search;
mod split;
mod trainer;

pub use encoder::LabelEncoder;
pub use search::{search, SearchGrid, SearchOutcome};
pub use split::{stratified_folds, train_test_split, Split};
pub use trainer::{CrossValidationPolicy, Trainer, TrainerConfig};
