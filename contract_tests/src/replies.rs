//! Reply shape contract
//!
//! - success: `[Okay][result tree]`
//! - failure: `[Fail][Int errno]`
//! - call: `[Call][request...]` with the return continuation as capability 0
//!
//! Anything else received as a reply is a protocol error (`EIO`).
