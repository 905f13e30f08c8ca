// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure, testable enforcement of the 1 MiB bundle size cap.
//!
//! `truncate` mutates `cm_data` in place to fit the remaining budget,
//! following the policy named by `policy`. It never touches the
//! filesystem or the network — every input and output is an in-memory
//! map, which is what keeps its seeded scenarios reproducible as plain
//! unit tests.

use std::collections::BTreeMap;

use cmv_core::{OversizePolicy, BUNDLE_SIZE_LIMIT};

/// Enforce the 1 MiB cap across `cm_data`, replacing entries from
/// `vol_data` where there's room and truncating the one entry that first
/// exceeds the budget per `policy`.
///
/// `original_size` is the caller-computed `Σ len(cm_data[k])` *before* any
/// mutation; callers must ensure `original_size <= 1 MiB` (an invariant
/// violation here is a caller bug, not a runtime condition this function
/// can recover from).
pub fn truncate(
    cm_data: &mut BTreeMap<String, Vec<u8>>,
    vol_data: &BTreeMap<String, Vec<u8>>,
    original_size: usize,
    policy: OversizePolicy,
) {
    let mut order: Vec<(String, i64)> = vol_data
        .iter()
        .filter_map(|(k, v)| {
            let old = cm_data.get(k)?;
            (old != v).then(|| (k.clone(), v.len() as i64 - old.len() as i64))
        })
        .collect();
    order.sort_by_key(|(_, delta)| *delta);

    let mut free: i64 = BUNDLE_SIZE_LIMIT as i64 - original_size as i64;
    debug_assert!(free >= 0, "oversize truncator entered with a negative free budget");

    for (k, delta) in order {
        if delta <= free {
            cm_data.insert(k.clone(), vol_data[&k].clone());
            free -= delta;
            continue;
        }

        let old_len = cm_data.get(&k).map(Vec::len).unwrap_or(0);
        let max_data_size = (old_len as i64 + free).max(0) as usize;
        let v = &vol_data[&k];

        match policy {
            OversizePolicy::TruncHead => {
                cm_data.insert(k, v[v.len() - max_data_size..].to_vec());
                break;
            }
            OversizePolicy::TruncTail => {
                cm_data.insert(k, v[..max_data_size].to_vec());
                break;
            }
            OversizePolicy::TruncHeadLine => {
                // v.len() > max_data_size always holds here (that's why we're
                // in this branch), so data_start is always > 0.
                let data_start = v.len() - max_data_size;
                if v[data_start - 1] != b'\n' {
                    match v[data_start..].iter().position(|&b| b == b'\n') {
                        None => continue,
                        Some(rel) if rel == max_data_size => continue,
                        Some(rel) => {
                            let new_start = data_start + rel + 1;
                            free -= (v.len() - new_start) as i64 - old_len as i64;
                            cm_data.insert(k, v[new_start..].to_vec());
                            break;
                        }
                    }
                }
                cm_data.insert(k, v[data_start..].to_vec());
                break;
            }
            OversizePolicy::TruncTailLine => {
                let data_end = max_data_size;
                if data_end > 0 && v[data_end - 1] != b'\n' {
                    match v[..data_end].iter().rposition(|&b| b == b'\n') {
                        None => continue,
                        Some(pos) => {
                            let new_end = pos + 1;
                            free -= new_end as i64 - old_len as i64;
                            cm_data.insert(k, v[..new_end].to_vec());
                            break;
                        }
                    }
                }
                cm_data.insert(k, v[..data_end].to_vec());
                break;
            }
        }
    }
}
