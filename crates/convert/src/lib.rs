//! Converters: the engines that move a file one format further.
//!
//! Every engine implements [`Converter`]. It declares the pairs it can
//! produce in a [`CapabilityMap`] and knows how to run itself once; the
//! provided [`Converter::convert`] wraps that single invocation with bounded
//! retries, verification through the identification service, collision-free
//! output naming and the registry update. Per-file problems come back as a
//! [`HopOutcome`], never as an error.
//!
//! A [`ConverterSet`] holds the registered converters in priority order.

mod capability;
mod combine;
mod converter;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
pub mod output;
mod process;
mod set;
mod status;

pub use crate::capability::CapabilityMap;
pub use crate::combine::{Combiner, CombinerHandle};
pub use crate::converter::{Cancellation, Converter, FailureReason, Hop, HopContext, HopOutcome, Os, convert_hop};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MockCombiner, MockConverter};
pub use crate::set::ConverterSet;
pub use crate::status::{Status, check_status};
use std::sync::Arc;

pub type ConverterHandle = Arc<dyn Converter>;
