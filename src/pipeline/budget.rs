use crate::models::PatientContext;

/// Warning appended to `retrieval_warnings` when any list was shrunk.
pub const TRUNCATION_WARNING: &str =
    "Patient context truncated to fit the document generation budget.";

/// Rough token estimate: whitespace-separated tokens of the compact JSON form.
pub fn estimate_units(context: &PatientContext) -> usize {
    serde_json::to_string(context)
        .map(|json| json.split_whitespace().count())
        .unwrap_or(0)
}

/// Shrink a context until its estimated size fits `max_units`.
///
/// Lists are halved in a fixed priority order (labs first, clinical flags
/// last), re-measuring after every shrink and stopping the moment the
/// budget is met. No list is cut below two entries, so a context that
/// still exceeds the budget with every list at the floor is returned
/// as-is. At most one truncation warning is appended regardless of how
/// many lists had to shrink.
pub fn fit_to_budget(mut context: PatientContext, max_units: usize) -> PatientContext {
    let halvers: [fn(&mut PatientContext) -> bool; 6] = [
        |c| halve(&mut c.recent_labs),
        |c| halve(&mut c.medications),
        |c| halve(&mut c.problem_list),
        |c| halve(&mut c.allergies),
        |c| halve(&mut c.recent_imaging),
        |c| halve(&mut c.clinical_flags),
    ];

    let mut truncated = false;
    'shrink: while estimate_units(&context) > max_units {
        let mut shrunk_this_pass = false;
        for shrink in halvers {
            if shrink(&mut context) {
                truncated = true;
                shrunk_this_pass = true;
                if estimate_units(&context) <= max_units {
                    break 'shrink;
                }
            }
        }
        if !shrunk_this_pass {
            tracing::warn!(
                units = estimate_units(&context),
                budget = max_units,
                "Context still over budget with all lists at minimum length"
            );
            break;
        }
    }

    if truncated {
        context
            .retrieval_warnings
            .push(TRUNCATION_WARNING.to_string());
    }
    context
}

/// Halve a list's length, keeping at least two entries. Returns whether
/// anything was removed.
fn halve<T>(list: &mut Vec<T>) -> bool {
    let target = (list.len() / 2).max(2);
    if target < list.len() {
        list.truncate(target);
        true
    } else {
        false
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
