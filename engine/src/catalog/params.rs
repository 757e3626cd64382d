//! The static parameter table.
//!
//! Paths use the restricted dialect from `hearth-fhirpath`: dotted fields,
//! `value[x]` choices, and `where(resolve() is T)` reference filters. Static
//! paths that fail to parse are a programming error and panic at first use.

use super::{Catalog, ParamDef, ParamType};
use std::collections::BTreeMap;

fn compile(paths: &[&'static str]) -> Vec<hearth_fhirpath::PathExpr> {
    paths
        .iter()
        .map(|p| {
            hearth_fhirpath::parse(p)
                .unwrap_or_else(|e| panic!("invalid catalog path '{}': {}", p, e))
        })
        .collect()
}

fn def(name: &'static str, param_type: ParamType, paths: &[&'static str]) -> ParamDef {
    ParamDef {
        name,
        param_type,
        paths: compile(paths),
        target_types: &[],
        components: &[],
        column: None,
    }
}

fn reference(
    name: &'static str,
    paths: &[&'static str],
    target_types: &'static [&'static str],
) -> ParamDef {
    ParamDef {
        target_types,
        ..def(name, ParamType::Reference, paths)
    }
}

fn composite(name: &'static str, components: &'static [&'static str]) -> ParamDef {
    ParamDef {
        components,
        ..def(name, ParamType::Composite, &[])
    }
}

fn column(name: &'static str, param_type: ParamType, column: &'static str) -> ParamDef {
    ParamDef {
        column: Some(column),
        ..def(name, param_type, &[])
    }
}

fn insert(map: &mut BTreeMap<&'static str, ParamDef>, def: ParamDef) {
    map.insert(def.name, def);
}

fn type_params(defs: Vec<ParamDef>) -> BTreeMap<&'static str, ParamDef> {
    let mut map = BTreeMap::new();
    for d in defs {
        insert(&mut map, d);
    }
    map
}

const PATIENT: &[&str] = &["Patient"];

pub(super) fn build() -> Catalog {
    let mut base = BTreeMap::new();
    insert(&mut base, column("_id", ParamType::Token, "id"));
    insert(
        &mut base,
        column("_lastUpdated", ParamType::Date, "last_updated"),
    );
    insert(&mut base, def("_profile", ParamType::Uri, &["meta.profile"]));
    insert(&mut base, def("_tag", ParamType::Token, &["meta.tag"]));
    insert(
        &mut base,
        def("_security", ParamType::Token, &["meta.security"]),
    );

    let mut by_type = BTreeMap::new();

    by_type.insert(
        "Patient",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("active", ParamType::Token, &["active"]),
            def("name", ParamType::String, &["name"]),
            def("family", ParamType::String, &["name.family"]),
            def("given", ParamType::String, &["name.given"]),
            def("telecom", ParamType::Token, &["telecom"]),
            def("gender", ParamType::Token, &["gender"]),
            def("birthdate", ParamType::Date, &["birthDate"]),
            def("death-date", ParamType::Date, &["deceased[x]"]),
            def("address", ParamType::String, &["address"]),
            def("address-city", ParamType::String, &["address.city"]),
            def("address-state", ParamType::String, &["address.state"]),
            def(
                "address-postalcode",
                ParamType::String,
                &["address.postalCode"],
            ),
            def("address-country", ParamType::String, &["address.country"]),
            def("language", ParamType::Token, &["communication.language"]),
            reference(
                "general-practitioner",
                &["generalPractitioner"],
                &["Practitioner", "PractitionerRole", "Organization"],
            ),
            reference("organization", &["managingOrganization"], &["Organization"]),
            reference("link", &["link.other"], &["Patient", "RelatedPerson"]),
        ]),
    );

    by_type.insert(
        "Observation",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("category", ParamType::Token, &["category"]),
            def("code", ParamType::Token, &["code"]),
            reference(
                "subject",
                &["subject"],
                &["Patient", "Group", "Device", "Location"],
            ),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            reference(
                "performer",
                &["performer"],
                &[
                    "Practitioner",
                    "PractitionerRole",
                    "Organization",
                    "CareTeam",
                    "Patient",
                    "RelatedPerson",
                ],
            ),
            def("date", ParamType::Date, &["effective[x]"]),
            def("issued", ParamType::Date, &["issued"]),
            def("value-quantity", ParamType::Quantity, &["value[x]"]),
            def("value-concept", ParamType::Token, &["value[x]"]),
            def("value-string", ParamType::String, &["value[x]"]),
            def("component-code", ParamType::Token, &["component.code"]),
            def(
                "component-value-quantity",
                ParamType::Quantity,
                &["component.value[x]"],
            ),
            composite("code-value-quantity", &["code", "value-quantity"]),
            composite(
                "component-code-value-quantity",
                &["component-code", "component-value-quantity"],
            ),
            reference(
                "derived-from",
                &["derivedFrom"],
                &["Observation", "DocumentReference"],
            ),
            reference("has-member", &["hasMember"], &["Observation"]),
            reference("specimen", &["specimen"], &["Specimen"]),
            reference("device", &["device"], &["Device", "DeviceMetric"]),
        ]),
    );

    by_type.insert(
        "Condition",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("clinical-status", ParamType::Token, &["clinicalStatus"]),
            def(
                "verification-status",
                ParamType::Token,
                &["verificationStatus"],
            ),
            def("category", ParamType::Token, &["category"]),
            def("severity", ParamType::Token, &["severity"]),
            def("code", ParamType::Token, &["code"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("onset-date", ParamType::Date, &["onset[x]"]),
            def("recorded-date", ParamType::Date, &["recordedDate"]),
            reference(
                "asserter",
                &["asserter"],
                &["Practitioner", "PractitionerRole", "Patient", "RelatedPerson"],
            ),
        ]),
    );

    by_type.insert(
        "Encounter",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("class", ParamType::Token, &["class"]),
            def("type", ParamType::Token, &["type"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference(
                "participant",
                &["participant.individual"],
                &["Practitioner", "PractitionerRole", "RelatedPerson"],
            ),
            def("date", ParamType::Date, &["period"]),
            def("reason-code", ParamType::Token, &["reasonCode"]),
            reference("service-provider", &["serviceProvider"], &["Organization"]),
            reference("part-of", &["partOf"], &["Encounter"]),
        ]),
    );

    by_type.insert(
        "MedicationRequest",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("intent", ParamType::Token, &["intent"]),
            def("category", ParamType::Token, &["category"]),
            def("code", ParamType::Token, &["medication[x]"]),
            reference("medication", &["medicationReference"], &["Medication"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("authoredon", ParamType::Date, &["authoredOn"]),
            reference(
                "requester",
                &["requester"],
                &[
                    "Practitioner",
                    "PractitionerRole",
                    "Organization",
                    "Patient",
                    "RelatedPerson",
                    "Device",
                ],
            ),
        ]),
    );

    by_type.insert(
        "Procedure",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("category", ParamType::Token, &["category"]),
            def("code", ParamType::Token, &["code"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("date", ParamType::Date, &["performed[x]"]),
            reference(
                "performer",
                &["performer.actor"],
                &["Practitioner", "PractitionerRole", "Organization"],
            ),
        ]),
    );

    by_type.insert(
        "Immunization",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("vaccine-code", ParamType::Token, &["vaccineCode"]),
            reference("patient", &["patient"], PATIENT),
            def("date", ParamType::Date, &["occurrence[x]"]),
            def("lot-number", ParamType::String, &["lotNumber"]),
            reference(
                "performer",
                &["performer.actor"],
                &["Practitioner", "PractitionerRole", "Organization"],
            ),
        ]),
    );

    by_type.insert(
        "AllergyIntolerance",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("clinical-status", ParamType::Token, &["clinicalStatus"]),
            def(
                "verification-status",
                ParamType::Token,
                &["verificationStatus"],
            ),
            def("category", ParamType::Token, &["category"]),
            def("criticality", ParamType::Token, &["criticality"]),
            def("code", ParamType::Token, &["code"]),
            reference("patient", &["patient"], PATIENT),
            def("date", ParamType::Date, &["recordedDate"]),
            reference(
                "asserter",
                &["asserter"],
                &["Practitioner", "PractitionerRole", "Patient", "RelatedPerson"],
            ),
        ]),
    );

    by_type.insert(
        "DiagnosticReport",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("category", ParamType::Token, &["category"]),
            def("code", ParamType::Token, &["code"]),
            reference("subject", &["subject"], &["Patient", "Group", "Device", "Location"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("date", ParamType::Date, &["effective[x]"]),
            def("issued", ParamType::Date, &["issued"]),
            reference(
                "performer",
                &["performer"],
                &["Practitioner", "PractitionerRole", "Organization", "CareTeam"],
            ),
            reference("result", &["result"], &["Observation"]),
        ]),
    );

    by_type.insert(
        "DocumentReference",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("type", ParamType::Token, &["type"]),
            def("category", ParamType::Token, &["category"]),
            reference("subject", &["subject"], &["Patient", "Group", "Device", "Practitioner"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            def("date", ParamType::Date, &["date"]),
            reference(
                "author",
                &["author"],
                &[
                    "Practitioner",
                    "PractitionerRole",
                    "Organization",
                    "Device",
                    "Patient",
                    "RelatedPerson",
                ],
            ),
            reference("custodian", &["custodian"], &["Organization"]),
            def("description", ParamType::String, &["description"]),
        ]),
    );

    by_type.insert(
        "CarePlan",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("intent", ParamType::Token, &["intent"]),
            def("category", ParamType::Token, &["category"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("date", ParamType::Date, &["period"]),
            reference("care-team", &["careTeam"], &["CareTeam"]),
        ]),
    );

    by_type.insert(
        "CareTeam",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("category", ParamType::Token, &["category"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference(
                "participant",
                &["participant.member"],
                &[
                    "Practitioner",
                    "PractitionerRole",
                    "RelatedPerson",
                    "Patient",
                    "Organization",
                    "CareTeam",
                ],
            ),
            def("date", ParamType::Date, &["period"]),
        ]),
    );

    by_type.insert(
        "ServiceRequest",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("intent", ParamType::Token, &["intent"]),
            def("category", ParamType::Token, &["category"]),
            def("code", ParamType::Token, &["code"]),
            reference("subject", &["subject"], &["Patient", "Group", "Device", "Location"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("authored", ParamType::Date, &["authoredOn"]),
            reference(
                "requester",
                &["requester"],
                &[
                    "Practitioner",
                    "PractitionerRole",
                    "Organization",
                    "Patient",
                    "RelatedPerson",
                    "Device",
                ],
            ),
            reference(
                "performer",
                &["performer"],
                &[
                    "Practitioner",
                    "PractitionerRole",
                    "Organization",
                    "CareTeam",
                    "HealthcareService",
                    "Patient",
                    "Device",
                    "RelatedPerson",
                ],
            ),
        ]),
    );

    by_type.insert(
        "RiskAssessment",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("method", ParamType::Token, &["method"]),
            reference("subject", &["subject"], &["Patient", "Group"]),
            reference("patient", &["subject.where(resolve() is Patient)"], PATIENT),
            reference("encounter", &["encounter"], &["Encounter"]),
            def("date", ParamType::Date, &["occurrence[x]"]),
            def(
                "probability",
                ParamType::Number,
                &["prediction.probability[x]"],
            ),
        ]),
    );

    by_type.insert(
        "Coverage",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("type", ParamType::Token, &["type"]),
            reference("beneficiary", &["beneficiary"], PATIENT),
            reference("patient", &["beneficiary"], PATIENT),
            reference(
                "payor",
                &["payor"],
                &["Organization", "Patient", "RelatedPerson"],
            ),
            reference("subscriber", &["subscriber"], &["Patient", "RelatedPerson"]),
            def("dependent", ParamType::String, &["dependent"]),
        ]),
    );

    by_type.insert(
        "Group",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("type", ParamType::Token, &["type"]),
            def("actual", ParamType::Token, &["actual"]),
            def("code", ParamType::Token, &["code"]),
            reference(
                "member",
                &["member.entity"],
                &[
                    "Patient",
                    "Practitioner",
                    "PractitionerRole",
                    "Device",
                    "Medication",
                    "Substance",
                    "Group",
                ],
            ),
            reference(
                "managing-entity",
                &["managingEntity"],
                &["Organization", "RelatedPerson", "Practitioner", "PractitionerRole"],
            ),
        ]),
    );

    by_type.insert(
        "Person",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("name", ParamType::String, &["name"]),
            def("gender", ParamType::Token, &["gender"]),
            def("birthdate", ParamType::Date, &["birthDate"]),
            reference(
                "link",
                &["link.target"],
                &["Patient", "Practitioner", "RelatedPerson", "Person"],
            ),
            reference("patient", &["link.target.where(resolve() is Patient)"], PATIENT),
            reference("organization", &["managingOrganization"], &["Organization"]),
        ]),
    );

    by_type.insert(
        "RelatedPerson",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("active", ParamType::Token, &["active"]),
            reference("patient", &["patient"], PATIENT),
            def("name", ParamType::String, &["name"]),
            def("gender", ParamType::Token, &["gender"]),
            def("birthdate", ParamType::Date, &["birthDate"]),
            def("relationship", ParamType::Token, &["relationship"]),
        ]),
    );

    by_type.insert(
        "Location",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("status", ParamType::Token, &["status"]),
            def("name", ParamType::String, &["name", "alias"]),
            def("type", ParamType::Token, &["type"]),
            def("address", ParamType::String, &["address"]),
            def("address-city", ParamType::String, &["address.city"]),
            def("address-state", ParamType::String, &["address.state"]),
            def(
                "address-postalcode",
                ParamType::String,
                &["address.postalCode"],
            ),
            reference("organization", &["managingOrganization"], &["Organization"]),
            reference("partof", &["partOf"], &["Location"]),
            def("near", ParamType::Special, &["position"]),
        ]),
    );

    by_type.insert(
        "Organization",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("active", ParamType::Token, &["active"]),
            def("name", ParamType::String, &["name", "alias"]),
            def("type", ParamType::Token, &["type"]),
            def("address-city", ParamType::String, &["address.city"]),
            def("address-state", ParamType::String, &["address.state"]),
            reference("partof", &["partOf"], &["Organization"]),
        ]),
    );

    by_type.insert(
        "Practitioner",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("active", ParamType::Token, &["active"]),
            def("name", ParamType::String, &["name"]),
            def("family", ParamType::String, &["name.family"]),
            def("given", ParamType::String, &["name.given"]),
            def("gender", ParamType::Token, &["gender"]),
            def("communication", ParamType::Token, &["communication"]),
        ]),
    );

    by_type.insert(
        "PractitionerRole",
        type_params(vec![
            def("identifier", ParamType::Token, &["identifier"]),
            def("active", ParamType::Token, &["active"]),
            reference("practitioner", &["practitioner"], &["Practitioner"]),
            reference("organization", &["organization"], &["Organization"]),
            def("role", ParamType::Token, &["code"]),
            def("specialty", ParamType::Token, &["specialty"]),
            def("date", ParamType::Date, &["period"]),
        ]),
    );

    let mut required: BTreeMap<&str, &[&str]> = BTreeMap::new();
    required.insert("Observation", &["status", "code"]);
    required.insert("Condition", &["subject"]);
    required.insert("Encounter", &["status", "class"]);
    required.insert(
        "MedicationRequest",
        &["status", "intent", "subject"],
    );
    required.insert("Procedure", &["status", "subject"]);
    required.insert("Immunization", &["status", "vaccineCode", "patient"]);
    required.insert("AllergyIntolerance", &["patient"]);
    required.insert("DiagnosticReport", &["status", "code"]);
    required.insert("CarePlan", &["status", "intent", "subject"]);
    required.insert("ServiceRequest", &["status", "intent", "subject"]);
    required.insert("Coverage", &["status", "beneficiary", "payor"]);
    required.insert("DocumentReference", &["status", "content"]);
    required.insert("Group", &["type", "actual"]);
    required.insert("RiskAssessment", &["status", "subject"]);

    Catalog {
        base,
        by_type,
        required,
    }
}
