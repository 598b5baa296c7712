use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use proxius_controller_core::{ConditionType, Reason, SyncState};

/// Builds the condition recorded for `reason`.
pub fn from_reason(
    reason: Reason,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    Condition {
        type_: reason.condition_type().to_string(),
        status: reason.status().to_string(),
        reason: reason.to_string(),
        message: reason.message().to_string(),
        observed_generation,
        last_transition_time: Time(now),
    }
}

/// Records `new` in `conditions`, keyed by type.
///
/// An existing condition of the same type is replaced in place. When its
/// status is unchanged the original transition time is kept. Returns true if
/// the set changed.
pub fn set(conditions: &mut Vec<Condition>, mut new: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new.type_) {
        Some(existing) => {
            if existing.status == new.status {
                new.last_transition_time = existing.last_transition_time.clone();
            }
            if *existing == new {
                return false;
            }
            *existing = new;
        }
        None => conditions.push(new),
    }
    true
}

/// Removes the condition of the given type. Returns true if one was removed.
pub fn remove(conditions: &mut Vec<Condition>, type_: ConditionType) -> bool {
    let len = conditions.len();
    conditions.retain(|c| c.type_ != type_.as_str());
    conditions.len() != len
}

pub fn find(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_.as_str())
}

/// Records the condition for `reason` and removes the other proxius
/// condition types, so that the set describes exactly one phase. Conditions
/// of unrecognized types are left alone.
pub fn record(
    conditions: &mut Vec<Condition>,
    reason: Reason,
    observed_generation: Option<i64>,
    now: DateTime<Utc>,
) -> bool {
    let type_ = reason.condition_type();
    let mut changed = false;
    for other in ConditionType::ALL.into_iter().filter(|t| *t != type_) {
        changed |= remove(conditions, other);
    }
    changed |= set(conditions, from_reason(reason, observed_generation, now));
    changed
}

pub fn sync_state(conditions: &[Condition]) -> SyncState {
    SyncState::from_conditions(
        conditions
            .iter()
            .map(|c| (c.type_.as_str(), c.status.as_str())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC
    }

    fn t1() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(0, 0).unwrap()
    }

    #[test]
    fn set_replaces_by_type() {
        let mut conditions = vec![];
        assert!(set(&mut conditions, from_reason(Reason::Reconciling, None, t0())));
        assert!(set(
            &mut conditions,
            from_reason(Reason::ConfigMapCreated, Some(1), t0())
        ));
        assert!(set(
            &mut conditions,
            from_reason(Reason::ConfigMapUpdated, Some(2), t1())
        ));

        assert_eq!(conditions.len(), 2);
        let ready = find(&conditions, ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, "ConfigMapUpdated");
        assert_eq!(ready.observed_generation, Some(2));
        // The status did not change, so neither does the transition time.
        assert_eq!(ready.last_transition_time, Time(t0()));
    }

    #[test]
    fn set_is_idempotent() {
        let mut conditions = vec![];
        assert!(set(
            &mut conditions,
            from_reason(Reason::ConfigMapCreated, Some(1), t0())
        ));
        assert!(!set(
            &mut conditions,
            from_reason(Reason::ConfigMapCreated, Some(1), t1())
        ));
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn status_change_updates_transition_time() {
        let mut conditions = vec![Condition {
            type_: "Ready".to_string(),
            status: "False".to_string(),
            reason: "Whatever".to_string(),
            message: "".to_string(),
            observed_generation: None,
            last_transition_time: Time(t0()),
        }];
        assert!(set(
            &mut conditions,
            from_reason(Reason::ConfigMapCreated, None, t1())
        ));
        assert_eq!(conditions[0].last_transition_time, Time(t1()));
    }

    #[test]
    fn record_keeps_one_phase() {
        let foreign = Condition {
            type_: "Available".to_string(),
            status: "True".to_string(),
            reason: "External".to_string(),
            message: "".to_string(),
            observed_generation: None,
            last_transition_time: Time(t0()),
        };
        let mut conditions = vec![foreign.clone()];

        record(&mut conditions, Reason::Reconciling, Some(1), t0());
        assert_eq!(sync_state(&conditions), SyncState::Syncing);

        record(&mut conditions, Reason::ConfigMapCreationFailed, Some(1), t0());
        assert_eq!(sync_state(&conditions), SyncState::Degraded);
        assert!(find(&conditions, ConditionType::Syncing).is_none());

        record(&mut conditions, Reason::ConfigMapCreated, Some(1), t1());
        assert_eq!(sync_state(&conditions), SyncState::Ready);
        assert_eq!(
            conditions,
            vec![foreign, from_reason(Reason::ConfigMapCreated, Some(1), t1())]
        );

        assert!(!record(&mut conditions, Reason::ConfigMapCreated, Some(1), t1()));
    }
}
