//! Static inference over the SSA-form HIR: how each reference treats its
//! value (effects), how long each value stays mutable (ranges), and what
//! nested functions do to the variables they capture.

pub mod effects;
pub mod functions;
pub mod ranges;
