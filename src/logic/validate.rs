use crate::error::ProtocolError;
use crate::model::{
    ChangeType, ComponentPayload, DatablockKind, NewChangeItem, PipelineTrigger,
};

/// Boundary validation of staged changes. A Change Item is only accepted into
/// a bucket once its payload shape matches the closed set for its component
/// type; the executor assumes items are well formed.
pub struct PayloadValidator;

impl PayloadValidator {
    pub fn validate(request: &NewChangeItem) -> Result<(), ProtocolError> {
        if request.component.component_id.trim().is_empty() {
            return Err(ProtocolError::validation("component_id must not be empty"));
        }
        if request.component.component_name.trim().is_empty() {
            return Err(ProtocolError::validation(
                "component_name must not be empty",
            ));
        }
        if request.change_summary.trim().is_empty() {
            return Err(ProtocolError::validation("change_summary must not be empty"));
        }

        match (request.change_type, &request.payload) {
            (ChangeType::Delete, Some(_)) => Err(ProtocolError::validation(
                "a delete change must not carry a payload",
            )),
            (ChangeType::Delete, None) => Ok(()),
            (_, None) => Err(ProtocolError::validation(format!(
                "a {} change requires a payload",
                request.change_type
            ))),
            (_, Some(payload)) => {
                if payload.component_type() != request.component.component_type {
                    return Err(ProtocolError::validation(format!(
                        "payload shape is for a {} but the component reference is a {}",
                        payload.component_type(),
                        request.component.component_type
                    )));
                }
                Self::validate_shape(payload)
            }
        }
    }

    fn validate_shape(payload: &ComponentPayload) -> Result<(), ProtocolError> {
        match payload {
            ComponentPayload::Datablock {
                kind,
                source,
                key_columns,
                window_seconds,
                label_column,
            } => {
                if source.trim().is_empty() {
                    return Err(ProtocolError::validation("datablock source must not be empty"));
                }
                if key_columns.is_empty() {
                    return Err(ProtocolError::validation(
                        "datablock needs at least one key column",
                    ));
                }
                match kind {
                    DatablockKind::Aggregated if window_seconds.is_none() => {
                        Err(ProtocolError::validation(
                            "aggregated datablock requires window_seconds",
                        ))
                    }
                    DatablockKind::Training if label_column.is_none() => {
                        Err(ProtocolError::validation(
                            "training datablock requires label_column",
                        ))
                    }
                    _ => Ok(()),
                }
            }
            ComponentPayload::Pipeline {
                trigger,
                datablock_ids,
                schedule,
            } => {
                if datablock_ids.is_empty() {
                    return Err(ProtocolError::validation(
                        "pipeline must reference at least one datablock",
                    ));
                }
                if *trigger == PipelineTrigger::Scheduled && schedule.is_none() {
                    return Err(ProtocolError::validation(
                        "scheduled pipeline requires a schedule expression",
                    ));
                }
                Ok(())
            }
            ComponentPayload::Feature {
                datablock_id,
                expression,
                ..
            } => {
                if datablock_id.trim().is_empty() {
                    return Err(ProtocolError::validation(
                        "feature must reference a datablock",
                    ));
                }
                if expression.trim().is_empty() {
                    return Err(ProtocolError::validation(
                        "feature expression must not be empty",
                    ));
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ComponentRef, ComponentType, FeatureDataType};

    fn request(
        change_type: ChangeType,
        component_type: ComponentType,
        payload: Option<ComponentPayload>,
    ) -> NewChangeItem {
        NewChangeItem {
            change_type,
            component: ComponentRef::new(component_type, "c-1".to_string(), "orders".to_string()),
            payload,
            change_summary: "edit".to_string(),
        }
    }

    #[test]
    fn delete_must_not_carry_a_payload() {
        let req = request(
            ChangeType::Delete,
            ComponentType::Feature,
            Some(ComponentPayload::Feature {
                datablock_id: "db-1".to_string(),
                expression: "count()".to_string(),
                data_type: FeatureDataType::Number,
            }),
        );
        assert!(matches!(
            PayloadValidator::validate(&req),
            Err(ProtocolError::Validation(_))
        ));

        let req = request(ChangeType::Delete, ComponentType::Feature, None);
        assert!(PayloadValidator::validate(&req).is_ok());
    }

    #[test]
    fn payload_tag_must_match_component_reference() {
        let req = request(
            ChangeType::Create,
            ComponentType::Pipeline,
            Some(ComponentPayload::Feature {
                datablock_id: "db-1".to_string(),
                expression: "count()".to_string(),
                data_type: FeatureDataType::Number,
            }),
        );
        assert!(matches!(
            PayloadValidator::validate(&req),
            Err(ProtocolError::Validation(_))
        ));
    }

    #[test]
    fn aggregated_datablock_requires_window() {
        let req = request(
            ChangeType::Create,
            ComponentType::Datablock,
            Some(ComponentPayload::Datablock {
                kind: DatablockKind::Aggregated,
                source: "events".to_string(),
                key_columns: vec!["user_id".to_string()],
                window_seconds: None,
                label_column: None,
            }),
        );
        assert!(matches!(
            PayloadValidator::validate(&req),
            Err(ProtocolError::Validation(_))
        ));
    }

    #[test]
    fn training_datablock_requires_label_column() {
        let req = request(
            ChangeType::Update,
            ComponentType::Datablock,
            Some(ComponentPayload::Datablock {
                kind: DatablockKind::Training,
                source: "events".to_string(),
                key_columns: vec!["user_id".to_string()],
                window_seconds: None,
                label_column: Some("converted".to_string()),
            }),
        );
        assert!(PayloadValidator::validate(&req).is_ok());
    }

    #[test]
    fn scheduled_pipeline_requires_schedule() {
        let req = request(
            ChangeType::Create,
            ComponentType::Pipeline,
            Some(ComponentPayload::Pipeline {
                trigger: PipelineTrigger::Scheduled,
                datablock_ids: vec!["db-1".to_string()],
                schedule: None,
            }),
        );
        assert!(matches!(
            PayloadValidator::validate(&req),
            Err(ProtocolError::Validation(_))
        ));
    }
}
