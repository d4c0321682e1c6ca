//! Identity extraction from the personal information payload.

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ConnectorError;
use crate::interception::PayloadTag;
use crate::models::{Address, Identity, PersonName, Phone, PhoneKind};
use crate::normalize::parse_payload_date;

/// Title of the card holding contact details on the personal information page.
pub const CONTACT_CARD_TITLE: &str = "Email et téléphone";
const PHONE_PLACEHOLDER: &str = "À renseigner";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonalInfoEnvelope {
    informations_personnelles: Option<PersonalInfo>,
    #[serde(flatten)]
    bare: PersonalInfo,
}

#[derive(Debug, Default, Deserialize)]
struct PersonalInfo {
    profil: Option<Profile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Profile {
    prenom: Option<String>,
    nom: Option<String>,
    date_naissance: Option<String>,
    #[serde(default)]
    coordonnees_contact: ContactDetails,
}

#[derive(Debug, Default, Deserialize)]
struct ContactDetails {
    email: Option<String>,
    adresse: Option<RawAddress>,
}

/// Address as sent by the portal.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAddress {
    pub num_voie: Option<String>,
    pub btq: Option<String>,
    pub point_remise: Option<String>,
    pub voie: Option<String>,
    pub complement: Option<String>,
    pub lieu_dit: Option<String>,
    pub code_postal: Option<String>,
    pub ville: Option<String>,
    pub pays: Option<String>,
}

/// A `.card` block scraped from the personal information page.
#[derive(Debug, Clone, Deserialize)]
pub struct ContactCard {
    pub title: String,
    #[serde(default)]
    pub lines: Vec<String>,
}

/// Build the identity from the first personal information payload.
///
/// `phones` are the numbers scraped from the page; the payload does not carry them.
pub fn extract_identity(payload: &Value, phones: Vec<Phone>) -> Result<Identity> {
    let envelope: PersonalInfoEnvelope =
        serde_json::from_value(payload.clone()).map_err(|e| ConnectorError::InvalidPayload {
            tag: PayloadTag::PersonalInfo,
            reason: e.to_string(),
        })?;
    let profile = envelope
        .informations_personnelles
        .and_then(|info| info.profil)
        .or(envelope.bare.profil)
        .ok_or_else(|| ConnectorError::InvalidPayload {
            tag: PayloadTag::PersonalInfo,
            reason: "missing profil".to_string(),
        })?;

    let email = non_empty(profile.coordonnees_contact.email)
        .ok_or(ConnectorError::MissingSourceIdentifier)?;

    let birth_date = profile
        .date_naissance
        .as_deref()
        .and_then(parse_payload_date);

    let address = profile
        .coordonnees_contact
        .adresse
        .map(|raw| vec![format_address(&raw)])
        .unwrap_or_default();

    if phones.is_empty() {
        info!("no phone number found");
    }

    Ok(Identity {
        email,
        birth_date,
        name: PersonName {
            given_name: non_empty(profile.prenom),
            family_name: non_empty(profile.nom),
        },
        address,
        phone: phones,
    })
}

/// Normalize an address, building `formatted_address` from the present fields
/// in postal order. Every present field is followed by one space, so
/// "75001 Paris" renders as `"75001 Paris "`.
pub fn format_address(raw: &RawAddress) -> Address {
    let mut address = Address {
        street_number: non_empty(raw.num_voie.clone()),
        building: non_empty(raw.btq.clone()),
        drop_off_point: non_empty(raw.point_remise.clone()),
        street: non_empty(raw.voie.clone()),
        complement: non_empty(raw.complement.clone()),
        locality: non_empty(raw.lieu_dit.clone()),
        post_code: non_empty(raw.code_postal.clone()),
        city: non_empty(raw.ville.clone()),
        country: non_empty(raw.pays.clone()),
        formatted_address: String::new(),
    };
    address.formatted_address = [
        &address.street_number,
        &address.building,
        &address.drop_off_point,
        &address.street,
        &address.complement,
        &address.locality,
        &address.post_code,
        &address.city,
        &address.country,
    ]
    .into_iter()
    .flatten()
    .fold(String::new(), |mut formatted, field| {
        formatted.push_str(field);
        formatted.push(' ');
        formatted
    });
    address
}

/// Phone numbers from the contact card.
///
/// Both landline ("fixe") and mobile lines are typed [`PhoneKind::Home`].
pub fn phones_from_cards(cards: &[ContactCard]) -> Vec<Phone> {
    let mut phones = Vec::new();
    for card in cards.iter().filter(|c| c.title.trim() == CONTACT_CARD_TITLE) {
        for line in &card.lines {
            if line.contains(PHONE_PLACEHOLDER) {
                continue;
            }
            if !(line.contains("fixe") || line.contains("mobile")) {
                continue;
            }
            let Some(number) = line.split(':').nth(1).map(str::trim).filter(|n| !n.is_empty())
            else {
                continue;
            };
            debug!("phone number found");
            phones.push(Phone {
                kind: PhoneKind::Home,
                number: number.to_string(),
            });
        }
    }
    phones
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn extracts_bare_profile_payload() {
        let payload = json!({
            "profil": {
                "prenom": "A",
                "nom": "B",
                "dateNaissance": "1980-01-01",
                "coordonneesContact": {
                    "email": "a@b.fr",
                    "adresse": { "ville": "Paris", "codePostal": "75001" }
                }
            }
        });
        let identity = extract_identity(&payload, Vec::new()).unwrap();
        assert_eq!(identity.email, "a@b.fr");
        assert_eq!(identity.birth_date, NaiveDate::from_ymd_opt(1980, 1, 1));
        assert_eq!(identity.name.given_name.as_deref(), Some("A"));
        assert_eq!(identity.name.family_name.as_deref(), Some("B"));
        assert_eq!(identity.address.len(), 1);
        assert_eq!(identity.address[0].city.as_deref(), Some("Paris"));
        assert_eq!(identity.address[0].post_code.as_deref(), Some("75001"));
        assert_eq!(identity.address[0].formatted_address, "75001 Paris ");
        assert!(identity.phone.is_empty());
    }

    #[test]
    fn accepts_wrapped_payload() {
        let payload = json!({
            "informationsPersonnelles": {
                "profil": { "coordonneesContact": { "email": "x@y.fr" } }
            }
        });
        let identity = extract_identity(&payload, Vec::new()).unwrap();
        assert_eq!(identity.email, "x@y.fr");
        assert!(identity.address.is_empty());
    }

    #[test]
    fn missing_email_is_missing_source_identifier() {
        let payload = json!({ "profil": { "prenom": "A", "coordonneesContact": { "email": " " } } });
        let err = extract_identity(&payload, Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::MissingSourceIdentifier)
        ));
    }

    #[test]
    fn missing_profile_is_invalid_payload() {
        let err = extract_identity(&json!({ "autre": 1 }), Vec::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::InvalidPayload { .. })
        ));
    }

    #[test]
    fn full_address_follows_postal_order() {
        let raw = RawAddress {
            num_voie: Some("12".into()),
            btq: Some("bis".into()),
            point_remise: Some("Bat A".into()),
            voie: Some("rue de la Paix".into()),
            complement: Some("3e étage".into()),
            lieu_dit: Some("Le Bourg".into()),
            code_postal: Some("75002".into()),
            ville: Some("Paris".into()),
            pays: Some("France".into()),
        };
        let address = format_address(&raw);
        assert_eq!(
            address.formatted_address,
            "12 bis Bat A rue de la Paix 3e étage Le Bourg 75002 Paris France "
        );
        assert_eq!(address.drop_off_point.as_deref(), Some("Bat A"));
    }

    #[test]
    fn blank_fields_are_skipped() {
        let raw = RawAddress {
            num_voie: Some("".into()),
            voie: Some("  ".into()),
            ville: Some("Lyon".into()),
            ..Default::default()
        };
        let address = format_address(&raw);
        assert_eq!(address.formatted_address, "Lyon ");
        assert_eq!(address.street, None);
    }

    #[test]
    fn phones_skip_placeholders_and_other_cards() {
        let cards = vec![
            ContactCard {
                title: "Adresse".into(),
                lines: vec!["Téléphone fixe : 0102030405".into()],
            },
            ContactCard {
                title: "Email et téléphone".into(),
                lines: vec![
                    "Email : a@b.fr".into(),
                    "Téléphone fixe : À renseigner".into(),
                    "Téléphone mobile : 0601020304".into(),
                ],
            },
        ];
        let phones = phones_from_cards(&cards);
        assert_eq!(
            phones,
            vec![Phone {
                kind: PhoneKind::Home,
                number: "0601020304".into()
            }]
        );
    }
}
