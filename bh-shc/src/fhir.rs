// Copyright (C) 2020-2026  The Blockhouse Technology Limited (TBTL).
//
// This program is free software: you can redistribute it and/or modify it
// under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU Affero General Public
// License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Extraction of patient and immunization facts from the FHIR bundle of a
//! verified card.
//!
//! Only the members needed for the facts are modelled; everything else in
//! the bundle is ignored.
//!
//! <https://spec.smarthealth.cards/#health-cards-are-encoded-as-compact-serialization-json-web-signatures-jws>

use bherror::traits::{ErrorContext as _, ForeignError as _};
use serde::Deserialize;
use serde_json::Value;

use crate::{verifier::VerifiedPayload, Error, FormatError, JsonObject, Result};

const RESOURCE_TYPE_PATIENT: &str = "Patient";
const RESOURCE_TYPE_IMMUNIZATION: &str = "Immunization";

/// A single fact extracted from a bundle entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    /// One name record of a `Patient` resource.
    Patient {
        /// Given names followed by the family name, separated by spaces.
        name: String,
    },
    /// An `Immunization` resource.
    Immunization {
        /// The `occurrenceDateTime`, as written by the issuer.
        occurrence: String,
        /// The `manufacturer.identifier` of the vaccine.
        manufacturer: Identifier,
        /// The `vaccineCode.coding[].code` values, in order.
        vaccine_codes: Vec<String>,
        /// The `lotNumber`, if present.
        lot_number: Option<String>,
    },
    /// Any other resource, verbatim.
    Other(JsonObject),
}

/// FHIR `Identifier`.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    /// The namespace of the value.
    pub system: Option<String>,
    /// The identifier value.
    pub value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifiableCredential {
    credential_subject: CredentialSubject,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialSubject {
    fhir_bundle: FhirBundle,
}

#[derive(Deserialize)]
struct FhirBundle {
    entry: Vec<BundleEntry>,
}

#[derive(Deserialize)]
struct BundleEntry {
    resource: JsonObject,
}

#[derive(Deserialize)]
struct Patient {
    #[serde(default)]
    name: Vec<HumanName>,
}

#[derive(Deserialize)]
struct HumanName {
    #[serde(default)]
    given: Vec<String>,
    family: String,
}

impl HumanName {
    fn full_name(&self) -> String {
        self.given
            .iter()
            .map(String::as_str)
            .chain([self.family.as_str()])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Immunization {
    occurrence_date_time: String,
    manufacturer: Reference,
    vaccine_code: Option<CodeableConcept>,
    lot_number: Option<String>,
}

#[derive(Deserialize)]
struct Reference {
    identifier: Identifier,
}

#[derive(Deserialize)]
struct CodeableConcept {
    #[serde(default)]
    coding: Vec<Coding>,
}

#[derive(Deserialize)]
struct Coding {
    code: Option<String>,
}

/// Walks `vc.credentialSubject.fhirBundle.entry` of the verified payload and
/// returns the facts of every entry, in entry order.
///
/// A `Patient` yields one fact per name record, an `Immunization` yields one
/// fact, and any other resource is returned verbatim.
///
/// # Errors
///
/// [`FormatError::InvalidFhirBundle`] is returned if the path does not exist,
/// if a resource has no `resourceType`, if a `Patient` name has no `family`,
/// or if an `Immunization` lacks `occurrenceDateTime` or
/// `manufacturer.identifier`.
pub fn extract_facts(payload: &VerifiedPayload) -> Result<Vec<Fact>> {
    let vc = payload
        .claims()
        .get("vc")
        .ok_or_else(|| invalid_bundle("`vc` claim is missing"))?;

    let vc = VerifiableCredential::deserialize(vc).match_foreign_err(|error| {
        Error::Format(FormatError::InvalidFhirBundle(error.to_string()))
    })?;

    let entries = vc.credential_subject.fhir_bundle.entry;

    let mut facts = Vec::new();
    for (index, entry) in entries.into_iter().enumerate() {
        extract_entry(entry.resource, &mut facts).ctx(|| format!("bundle entry {index}"))?;
    }

    tracing::debug!(facts = facts.len(), "extracted facts from FHIR bundle");

    Ok(facts)
}

fn extract_entry(resource: JsonObject, facts: &mut Vec<Fact>) -> Result<()> {
    let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
        return Err(invalid_bundle("resource has no `resourceType`"));
    };

    match resource_type {
        RESOURCE_TYPE_PATIENT => {
            let patient: Patient = parse_resource(resource)?;
            facts.extend(patient.name.iter().map(|name| Fact::Patient {
                name: name.full_name(),
            }));
        }
        RESOURCE_TYPE_IMMUNIZATION => {
            let immunization: Immunization = parse_resource(resource)?;
            facts.push(Fact::Immunization {
                occurrence: immunization.occurrence_date_time,
                manufacturer: immunization.manufacturer.identifier,
                vaccine_codes: immunization
                    .vaccine_code
                    .map(|concept| concept.coding.into_iter().filter_map(|c| c.code).collect())
                    .unwrap_or_default(),
                lot_number: immunization.lot_number,
            });
        }
        _ => facts.push(Fact::Other(resource)),
    }

    Ok(())
}

fn parse_resource<T: for<'de> Deserialize<'de>>(resource: JsonObject) -> Result<T> {
    serde_json::from_value(Value::Object(resource)).match_foreign_err(|error| {
        Error::Format(FormatError::InvalidFhirBundle(error.to_string()))
    })
}

#[track_caller]
fn invalid_bundle(message: &str) -> bherror::Error<Error> {
    FormatError::InvalidFhirBundle(message.to_owned()).root()
}
