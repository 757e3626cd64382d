//! Patient compartment membership.
//!
//! Maps each compartment-member resource type to the reference parameters
//! that place a resource of that type into a patient's compartment. Mostly
//! `patient`; the exceptions (Coverage, Group, Person) are spelled out.

/// One compartment membership rule.
#[derive(Debug, Clone, Copy)]
pub struct CompartmentParam {
    pub resource_type: &'static str,
    /// Catalog parameter names whose reference rows link into the compartment.
    pub params: &'static [&'static str],
}

static PATIENT_COMPARTMENT: &[CompartmentParam] = &[
    CompartmentParam {
        resource_type: "AllergyIntolerance",
        params: &["patient", "asserter"],
    },
    CompartmentParam {
        resource_type: "CarePlan",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "CareTeam",
        params: &["patient", "participant"],
    },
    CompartmentParam {
        resource_type: "Condition",
        params: &["patient", "asserter"],
    },
    CompartmentParam {
        resource_type: "Coverage",
        params: &["beneficiary", "subscriber", "payor"],
    },
    CompartmentParam {
        resource_type: "DiagnosticReport",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "DocumentReference",
        params: &["patient", "author"],
    },
    CompartmentParam {
        resource_type: "Encounter",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "Group",
        params: &["member"],
    },
    CompartmentParam {
        resource_type: "Immunization",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "MedicationRequest",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "Observation",
        params: &["patient", "performer"],
    },
    CompartmentParam {
        resource_type: "Person",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "Procedure",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "RelatedPerson",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "RiskAssessment",
        params: &["patient"],
    },
    CompartmentParam {
        resource_type: "ServiceRequest",
        params: &["patient", "performer"],
    },
];

/// Membership rules for the Patient compartment.
pub fn patient_compartment() -> &'static [CompartmentParam] {
    PATIENT_COMPARTMENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::catalog;

    #[test]
    fn every_compartment_param_exists_in_the_catalog() {
        for rule in patient_compartment() {
            for param in rule.params {
                let def = catalog()
                    .get(rule.resource_type, param)
                    .unwrap_or_else(|| panic!("{}.{} missing", rule.resource_type, param));
                assert_eq!(
                    def.param_type,
                    crate::catalog::ParamType::Reference,
                    "{}.{} must be a reference",
                    rule.resource_type,
                    param
                );
            }
        }
    }

    #[test]
    fn coverage_uses_beneficiary() {
        let coverage = patient_compartment()
            .iter()
            .find(|r| r.resource_type == "Coverage")
            .unwrap();
        assert!(coverage.params.contains(&"beneficiary"));
    }
}
