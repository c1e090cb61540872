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

use bh_shc::{Fact, HealthCard, Identifier, VerificationResult};
use serde_json::Value;

/// Renders the card as lines of text, the verification summary first.
pub(crate) fn render_card(card: &HealthCard) -> Vec<String> {
    std::iter::once(render_verification(&card.verification))
        .chain(card.facts.iter().map(render_fact))
        .collect()
}

fn render_verification(verification: &VerificationResult) -> String {
    format!(
        "Verified by {} (kid {})",
        verification.issuer, verification.kid
    )
}

fn render_fact(fact: &Fact) -> String {
    match fact {
        Fact::Patient { name } => format!("Patient: {name}"),
        Fact::Immunization {
            occurrence,
            manufacturer,
            vaccine_codes,
            lot_number,
        } => {
            let mut line = format!(
                "Immunization: {occurrence} by {}",
                render_identifier(manufacturer)
            );
            if !vaccine_codes.is_empty() {
                line.push_str(&format!(" (vaccine {})", vaccine_codes.join(",")));
            }
            if let Some(lot_number) = lot_number {
                line.push_str(&format!(" (lot {lot_number})"));
            }
            line
        }
        Fact::Other(resource) => format!("Resource: {}", Value::Object(resource.clone())),
    }
}

// `system|value`, or just `value` without a system
fn render_identifier(identifier: &Identifier) -> String {
    match &identifier.system {
        Some(system) => format!("{system}|{}", identifier.value),
        None => identifier.value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn card(facts: Vec<Fact>) -> HealthCard {
        HealthCard {
            verification: VerificationResult {
                kid: "key-1".to_owned(),
                issuer: "https://issuer.example".to_owned(),
            },
            facts,
        }
    }

    #[test]
    fn renders_summary_then_facts() {
        let lines = render_card(&card(vec![
            Fact::Patient {
                name: "Jane Q Doe".to_owned(),
            },
            Fact::Immunization {
                occurrence: "2021-05-01".to_owned(),
                manufacturer: Identifier {
                    system: Some("http://hl7.org/fhir/sid/mvx".to_owned()),
                    value: "MOD".to_owned(),
                },
                vaccine_codes: vec!["207".to_owned()],
                lot_number: Some("0000001".to_owned()),
            },
        ]));

        assert_eq!(
            lines,
            [
                "Verified by https://issuer.example (kid key-1)",
                "Patient: Jane Q Doe",
                "Immunization: 2021-05-01 by http://hl7.org/fhir/sid/mvx|MOD (vaccine 207) (lot 0000001)",
            ]
        );
    }

    #[test]
    fn renders_minimal_immunization() {
        let lines = render_card(&card(vec![Fact::Immunization {
            occurrence: "2021-01-01".to_owned(),
            manufacturer: Identifier {
                system: None,
                value: "PFR".to_owned(),
            },
            vaccine_codes: vec![],
            lot_number: None,
        }]));

        assert_eq!(lines[1], "Immunization: 2021-01-01 by PFR");
    }

    #[test]
    fn renders_other_resources_as_compact_json() {
        let resource = json!({"resourceType": "Observation", "status": "final"});

        let lines = render_card(&card(vec![Fact::Other(
            resource.as_object().unwrap().clone(),
        )]));

        assert_eq!(
            lines[1],
            r#"Resource: {"resourceType":"Observation","status":"final"}"#
        );
    }
}
