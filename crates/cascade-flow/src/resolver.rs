//! Request resolution: turning a client request, its cursor, and a
//! live-head probe into an execution plan.
//!
//! The plan separates three block numbers: where the client thinks the
//! stream starts (`request_start_block_num`), where the pipeline actually
//! begins to reconstruct state (`effective_start_block_num`), and where
//! parallel back-processing hands off to linear live streaming
//! (`linear_handoff_block_num`).

use cascade_core::{Cursor, Error as CoreError, Step};

use crate::error::{Error, Result};
use crate::request::Request;

/// The resolved execution plan for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDetails {
    /// Start block as seen by the client.
    pub request_start_block_num: u64,
    /// Where the pipeline actually begins; may be earlier than the
    /// request start to reconstruct store state.
    pub effective_start_block_num: u64,
    /// Where back-processing ends and linear live streaming begins.
    pub linear_handoff_block_num: u64,
    /// Exclusive stop block; zero means unbounded.
    pub stop_block_num: u64,
    /// True for orchestrator-issued back-processing requests.
    pub is_sub_request: bool,
    /// True when the client requested production mode.
    pub production_mode: bool,
}

/// Resolves the block number a request starts at.
///
/// Without a cursor this is the requested start block. With a cursor,
/// the step decides: an `Undo` cursor re-delivers its block, every other
/// known step resumes one block after it.
///
/// # Errors
///
/// Fails with an invalid-argument error for a negative start block
/// without a cursor, and with an invalid-cursor error for undecodable
/// cursors or unknown steps.
pub fn resolve_start_block_num(request: &Request) -> Result<u64> {
    if request.start_cursor.is_empty() {
        return u64::try_from(request.start_block_num).map_err(|_| {
            Error::invalid_argument(format!(
                "negative start block {} must be resolved against the live head first",
                request.start_block_num
            ))
        });
    }

    let cursor = Cursor::from_opaque(&request.start_cursor)?;
    match cursor.step {
        Step::Undo => Ok(cursor.block.num),
        Step::New | Step::Irreversible | Step::NewIrreversible => Ok(cursor.block.num + 1),
    }
}

/// Computes the handoff block between back-processing and live streaming.
///
/// With a reachable live head, an unbounded request hands off at the
/// head and a bounded one at `min(head, stop)`. Without a live head, a
/// bounded request hands off at its stop block; an unbounded one cannot
/// proceed at all.
///
/// # Errors
///
/// Fails when no live head is available and `stop_block_num` is zero.
pub fn compute_live_handoff_block_num<F>(live_head: F, stop_block_num: u64) -> Result<u64>
where
    F: FnOnce() -> std::result::Result<u64, CoreError>,
{
    match live_head() {
        Ok(head) => {
            if stop_block_num == 0 {
                Ok(head)
            } else {
                Ok(head.min(stop_block_num))
            }
        }
        Err(err) => {
            if stop_block_num == 0 {
                Err(Error::NoLiveHead {
                    message: format!("no live head and no stop block: {err}"),
                })
            } else {
                Ok(stop_block_num)
            }
        }
    }
}

/// Builds the execution plan for a request.
///
/// Production-mode requests consult the live-head probe to place the
/// handoff. Dev-mode requests stream linearly from their start block and
/// must not invoke the probe at all.
///
/// The effective start block is initialized to the request start; the
/// service lowers it against the module graph once the required modules
/// are known.
///
/// # Errors
///
/// Propagates start-block resolution and handoff computation failures.
pub fn build_request_details<F>(
    request: &Request,
    is_sub_request: bool,
    live_head: F,
) -> Result<RequestDetails>
where
    F: FnOnce() -> std::result::Result<u64, CoreError>,
{
    let request_start_block_num = resolve_start_block_num(request)?;

    let linear_handoff_block_num = if request.production_mode {
        compute_live_handoff_block_num(live_head, request.stop_block_num)?
    } else {
        request_start_block_num
    };

    Ok(RequestDetails {
        request_start_block_num,
        effective_start_block_num: request_start_block_num,
        linear_handoff_block_num,
        stop_block_num: request.stop_block_num,
        is_sub_request,
        production_mode: request.production_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use cascade_core::BlockRef;

    fn cursor_request(step_wire: u8) -> Request {
        // Encode the raw payload directly so tests can exercise the zero
        // step, which Cursor::new cannot represent.
        let payload = format!("c1:{step_wire}:10:10a:9:9a:10:10a");
        Request {
            start_block_num: 10,
            start_cursor: URL_SAFE_NO_PAD.encode(payload),
            ..Request::default()
        }
    }

    #[test]
    fn no_cursor_returns_request_start() {
        let request = Request {
            start_block_num: 10,
            ..Request::default()
        };
        assert_eq!(resolve_start_block_num(&request).unwrap(), 10);
    }

    #[test]
    fn invalid_cursor_step_fails() {
        let err = resolve_start_block_num(&cursor_request(0)).unwrap_err();
        assert!(matches!(
            err,
            Error::Core(CoreError::InvalidCursor { .. })
        ));
    }

    #[test]
    fn step_undo_redelivers_cursor_block() {
        let request = cursor_request(Step::Undo.as_wire());
        assert_eq!(resolve_start_block_num(&request).unwrap(), 10);
    }

    #[test]
    fn step_new_resumes_after_cursor_block() {
        let request = cursor_request(Step::New.as_wire());
        assert_eq!(resolve_start_block_num(&request).unwrap(), 11);
    }

    #[test]
    fn step_irreversible_resumes_after_cursor_block() {
        let request = cursor_request(Step::Irreversible.as_wire());
        assert_eq!(resolve_start_block_num(&request).unwrap(), 11);
    }

    #[test]
    fn step_new_irreversible_resumes_after_cursor_block() {
        let request = cursor_request(Step::NewIrreversible.as_wire());
        assert_eq!(resolve_start_block_num(&request).unwrap(), 11);
    }

    #[test]
    fn well_formed_cursor_from_api_resolves_too() {
        let cursor = Cursor::new(
            Step::New,
            BlockRef::new("10a", 10),
            BlockRef::new("9a", 9),
            BlockRef::new("10a", 10),
        );
        let request = Request {
            start_block_num: 10,
            start_cursor: cursor.to_opaque(),
            ..Request::default()
        };
        assert_eq!(resolve_start_block_num(&request).unwrap(), 11);
    }

    #[test]
    fn negative_start_without_cursor_fails() {
        let request = Request {
            start_block_num: -100,
            ..Request::default()
        };
        assert!(resolve_start_block_num(&request).is_err());
    }

    #[test]
    fn handoff_live_available() {
        // (live, stop) -> handoff
        for (head, stop, expected) in [(100, 0, 100), (100, 150, 100), (100, 50, 50)] {
            let got = compute_live_handoff_block_num(|| Ok(head), stop).unwrap();
            assert_eq!(got, expected, "head={head} stop={stop}");
        }
    }

    #[test]
    fn handoff_no_live_bounded_uses_stop() {
        let got = compute_live_handoff_block_num(
            || Err(CoreError::internal("live not available")),
            50,
        )
        .unwrap();
        assert_eq!(got, 50);
    }

    #[test]
    fn handoff_no_live_unbounded_fails() {
        let err = compute_live_handoff_block_num(
            || Err(CoreError::internal("live not available")),
            0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoLiveHead { .. }));
    }

    #[test]
    fn dev_mode_skips_probe() {
        let request = Request {
            start_block_num: 10,
            production_mode: false,
            ..Request::default()
        };
        let details = build_request_details(&request, true, || {
            panic!("live-head probe must not be invoked in dev mode")
        })
        .unwrap();
        assert_eq!(details.request_start_block_num, 10);
        assert_eq!(details.linear_handoff_block_num, 10);
    }

    #[test]
    fn production_mode_uses_probe() {
        let request = Request {
            start_block_num: 10,
            production_mode: true,
            ..Request::default()
        };
        let details = build_request_details(&request, true, || Ok(999)).unwrap();
        assert_eq!(details.request_start_block_num, 10);
        assert_eq!(details.linear_handoff_block_num, 999);
    }

    #[test]
    fn details_carry_request_facts() {
        let request = Request {
            start_block_num: 10,
            stop_block_num: 20,
            production_mode: false,
            ..Request::default()
        };
        let details = build_request_details(&request, false, || Ok(0)).unwrap();
        assert_eq!(details.stop_block_num, 20);
        assert!(!details.is_sub_request);
        assert!(!details.production_mode);
        assert_eq!(details.effective_start_block_num, 10);
    }
}
