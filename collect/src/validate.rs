//! Kind-specific required-field rules. Only the first violation found is
//! reported, consumers get a segmented path pointing at the field.

use crate::api::Violation;
use crate::event::{Alias, Group, Identify, Page, Screen, Track};

pub trait Validate {
    fn validate(&self) -> Result<(), Violation>;
}

fn is_set(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|value| !value.is_empty())
}

impl Validate for Identify {
    fn validate(&self) -> Result<(), Violation> {
        if is_set(&self.user_id) || is_set(&self.anonymous_id) {
            return Ok(());
        }
        Err(Violation::new(
            "either userId or anonymousId must be set",
            &["analytics", "Identify", "userId"],
        ))
    }
}

impl Validate for Track {
    fn validate(&self) -> Result<(), Violation> {
        if is_set(&self.event) {
            return Ok(());
        }
        Err(Violation::new(
            "event must be set",
            &["analytics", "Track", "event"],
        ))
    }
}

impl Validate for Group {
    fn validate(&self) -> Result<(), Violation> {
        if is_set(&self.group_id) {
            return Ok(());
        }
        Err(Violation::new(
            "groupId must be set",
            &["analytics", "Group", "groupId"],
        ))
    }
}

impl Validate for Alias {
    fn validate(&self) -> Result<(), Violation> {
        if is_set(&self.previous_id) {
            return Ok(());
        }
        Err(Violation::new(
            "previousId must be set",
            &["analytics", "Alias", "previousId"],
        ))
    }
}

impl Validate for Page {
    fn validate(&self) -> Result<(), Violation> {
        Ok(())
    }
}

impl Validate for Screen {
    fn validate(&self) -> Result<(), Violation> {
        Ok(())
    }
}
