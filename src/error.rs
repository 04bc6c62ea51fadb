use core::fmt::Display;

use crate::Entity;

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
/// The different kinds of errors which can occur
pub enum Error {
    /// The requested entity did not exist
    NoSuchEntity(Entity),
    /// The referenced stage was never registered with the runner
    UnknownStage(&'static str),
    /// The referenced sub-application was never registered
    UnknownSubApp(&'static str),
}

/// Result alias for [crate::error::Error]
pub type Result<T> = core::result::Result<T, Error>;

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::NoSuchEntity(id) => write!(f, "Entity {id} does not exist"),
            Error::UnknownStage(name) => {
                write!(f, "Stage {name} is not registered in any stage graph")
            }
            Error::UnknownSubApp(name) => {
                write!(f, "Sub-application {name} is not registered")
            }
        }
    }
}
