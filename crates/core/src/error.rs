use thiserror::Error;

use crate::catalog::CatalogError;
use crate::model::LearnerError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Learner(#[from] LearnerError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
