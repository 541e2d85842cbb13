//! Recovery of documents whose byte stream was cut off mid-structure.
//!
//! Acquisition truncates at fixed-size boundaries, so a damaged document is a
//! valid JSON prefix followed by one incomplete fragment. The repairer keeps
//! everything up to the end of the last complete sibling element, drops the
//! fragment and closes whatever containers are still open.

use crate::common::error::RepairError;
use crate::observability::metrics;
use serde_json::Value;
use tracing::{debug, info};

/// A successfully repaired document
#[derive(Debug, Clone)]
pub struct Repaired {
    pub document: Value,
    /// Bytes of the original kept before the synthetic closers
    pub recovered_bytes: usize,
    pub original_bytes: usize,
}

/// Cut point found by [`find_boundary`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boundary {
    /// Offset at which to truncate the original
    pub offset: usize,
    /// Containers still open at `offset`, outermost first (`{` or `[`)
    pub open: Vec<u8>,
}

/// Locate the last complete sibling boundary.
///
/// Boundaries are the position right after any closing bracket, and the
/// position of a comma directly inside an array. Commas between object
/// members are ignored so a half-written datapoint is dropped whole. Bracket
/// characters inside string literals are skipped. A mismatched closer ends
/// the scan.
pub fn find_boundary(raw: &[u8]) -> Option<Boundary> {
    let mut stack: Vec<u8> = Vec::new();
    let mut good: Option<(usize, usize)> = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in raw.iter().enumerate() {
        if in_string {
            if escape_next {
                escape_next = false;
            } else if b == b'\\' {
                escape_next = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }

        match b {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(b),
            b'}' | b']' => {
                let opener = if b == b'}' { b'{' } else { b'[' };
                if stack.last() != Some(&opener) {
                    break;
                }
                stack.pop();
                good = Some((i + 1, stack.len()));
            }
            b',' if stack.last() == Some(&b'[') => good = Some((i, stack.len())),
            _ => {}
        }
    }

    // stack[..depth] cannot have changed since the boundary was recorded:
    // popping below `depth` would itself have recorded a newer boundary.
    good.map(|(offset, depth)| Boundary {
        offset,
        open: stack[..depth].to_vec(),
    })
}

/// Produce the repaired JSON text: the prefix up to the last boundary plus
/// closers for every still-open container, innermost first.
pub fn repair_text(raw: &[u8]) -> Result<String, RepairError> {
    close_at_boundary(raw).map(|(text, _)| text)
}

fn close_at_boundary(raw: &[u8]) -> Result<(String, usize), RepairError> {
    let boundary = find_boundary(raw).ok_or(RepairError::NoBoundary)?;
    let prefix = std::str::from_utf8(&raw[..boundary.offset])
        .map_err(|e| RepairError::StillInvalid(e.to_string()))?;

    let mut repaired = String::with_capacity(prefix.len() + boundary.open.len());
    repaired.push_str(prefix);
    for opener in boundary.open.iter().rev() {
        repaired.push(if *opener == b'[' { ']' } else { '}' });
    }
    Ok((repaired, boundary.offset))
}

/// Repair a truncated document and parse the result.
pub fn repair_truncated(raw: &[u8], document: &str) -> Result<Repaired, RepairError> {
    metrics::repair::attempt();
    let result = close_at_boundary(raw).and_then(|(text, offset)| {
        let value: Value =
            serde_json::from_str(&text).map_err(|e| RepairError::StillInvalid(e.to_string()))?;
        if !value.is_object() {
            return Err(RepairError::NotAnObject);
        }
        Ok((value, offset))
    });

    match result {
        Ok((document_value, recovered)) => {
            metrics::repair::success(recovered, raw.len());
            info!(
                "REPAIRED {}: recovered {} / {} bytes ({:.1}%)",
                document,
                recovered,
                raw.len(),
                recovered as f64 / raw.len().max(1) as f64 * 100.0
            );
            Ok(Repaired {
                document: document_value,
                recovered_bytes: recovered,
                original_bytes: raw.len(),
            })
        }
        Err(e) => {
            metrics::repair::failure();
            debug!("Repair of {} failed: {}", document, e);
            Err(e)
        }
    }
}
