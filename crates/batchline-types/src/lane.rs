//! Lane naming conventions.
//!
//! Stages declare lanes in *stage naming* (`"out"`). Inside the pipe graph
//! every lane carries postfixes identifying the pipe that produced it
//! (`"out::s"`, `"out::s::o"`, `"out::s::o::m--target"`). Stripping
//! everything from the first [`SEPARATOR`] recovers the stage-naming lane.

/// Separator between a lane name and its postfixes.
pub const SEPARATOR: &str = "::";
/// Postfix of a lane emitted by a stage pipe.
pub const STAGE_OUT: &str = "::s";
/// Postfix of a lane emitted by an observer pipe.
pub const OBSERVER_OUT: &str = "::o";
/// Postfix of a lane emitted by a multiplexer pipe.
pub const MULTIPLEXER_OUT: &str = "::m";
/// Postfix of a lane emitted by a combiner pipe.
pub const COMBINER_OUT: &str = "::c";
/// Separator between a multiplexed lane and the stage it is routed to.
pub const ROUTING_SEPARATOR: &str = "--";

/// Append `postfix` to `lane`.
#[must_use]
pub fn postfixed(lane: &str, postfix: &str) -> String {
    format!("{lane}{postfix}")
}

/// Pipe-naming lane a stage writes its stage-naming `lane` into.
#[must_use]
pub fn stage_out(lane: &str) -> String {
    postfixed(lane, STAGE_OUT)
}

/// Lane name seen by the observer, and the key of the rule lane index.
#[must_use]
pub fn observer_lane(lane: &str) -> String {
    postfixed(&stage_out(lane), OBSERVER_OUT)
}

/// Copy of `lane` routed to the `consumer` stage.
#[must_use]
pub fn multiplexer_lane(lane: &str, consumer: &str) -> String {
    format!(
        "{}{MULTIPLEXER_OUT}{ROUTING_SEPARATOR}{consumer}",
        observer_lane(lane)
    )
}

/// Single merged input lane of a stage with several input lanes.
#[must_use]
pub fn combiner_lane(instance_name: &str) -> String {
    postfixed(instance_name, COMBINER_OUT)
}

/// Strip every postfix, returning the stage-naming lane.
#[must_use]
pub fn remove_postfix(lane: &str) -> &str {
    lane.find(SEPARATOR).map_or(lane, |idx| &lane[..idx])
}

/// Whether `lane` is usable as a stage-naming lane name.
#[must_use]
pub fn is_valid_stage_lane(lane: &str) -> bool {
    !lane.trim().is_empty() && !lane.contains(SEPARATOR) && !lane.contains(ROUTING_SEPARATOR)
}
