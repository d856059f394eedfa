//! Optimizer glue over the collated buffers: gradient clipping and the
//! RMSprop update rule. Both operate on the flat variable/gradient arrays
//! the graph exposes through its [`crate::buffer::VarStore`] handle, invoked
//! by the caller between backward and the next forward.

pub mod grad_clipping;
pub mod rmsprop;

pub use grad_clipping::clip_grad_norm_;
pub use rmsprop::RmsProp;
