//! Command-line Error Types
//!
//! Every fatal failure of a command ends up as one of these, with the error
//! tree of the crate that raised it underneath.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    /// Pass `--input` or set `input` in the configuration.
    #[display("no input directory given")]
    NoInput,
    /// Install `sf` (Siegfried) and make sure it is on `PATH`.
    #[display("format identification service not available")]
    Identifier,
    /// Install or enable at least one conversion engine.
    #[display("no conversion engines available")]
    NoEngines,
    #[display("could not build the route table")]
    Routes,
    #[display("could not ingest input files")]
    Ingest,
    #[display("conversion run failed")]
    Run,
}
