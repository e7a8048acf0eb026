//! Free-text address normalization
//!
//! Parses a street address into the components the county parcel layer
//! indexes on. The parser targets Maricopa County address conventions, not
//! general U.S. addresses: `NUMBER [PREDIR] NAME.. STREETTYPE [CITY STATE ZIP]`.
//!
//! Normalization is pure and deterministic; an input neither pattern can
//! parse yields components carrying only `raw`, which downstream WHERE-clause
//! strategies treat as unusable.

/// Structured address components
///
/// City is never defaulted: an address with no explicit city token leaves
/// `city` unset, which deliberately disables the WHERE-clause strategies
/// that require it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressComponents {
    /// Street number, digits only
    pub street_number: Option<String>,
    /// N/S/E/W/NE/NW/SE/SW
    pub predirectional: Option<String>,
    pub street_name: Option<String>,
    /// Normalized abbreviation ("ST", "AVE", ...)
    pub street_type: Option<String>,
    pub city: Option<String>,
    /// Original input, untouched
    pub raw: String,
}

impl AddressComponents {
    fn unparsed(raw: &str) -> Self {
        Self {
            street_number: None,
            predirectional: None,
            street_name: None,
            street_type: None,
            city: None,
            raw: raw.trim().to_string(),
        }
    }

    /// WHERE-clause strategies require number, name, and city
    pub fn is_complete(&self) -> bool {
        self.street_number.is_some() && self.street_name.is_some() && self.city.is_some()
    }

    /// Street name with the predirectional attached, as the parcel layer
    /// stores it ("N WILKINSON" rather than "WILKINSON")
    pub fn full_street_name(&self) -> Option<String> {
        let name = self.street_name.as_deref()?;
        Some(match self.predirectional.as_deref() {
            Some(predir) => format!("{predir} {name}"),
            None => name.to_string(),
        })
    }
}

/// Normalize a free-text address into structured components
pub fn normalize(raw: &str) -> AddressComponents {
    let tokens = clean_tokens(raw);
    if tokens.is_empty() {
        return AddressComponents::unparsed(raw);
    }

    if let Some(components) = parse_primary(&tokens, raw) {
        return components;
    }
    if let Some(components) = parse_ordinal(&tokens, raw) {
        return components;
    }

    AddressComponents::unparsed(raw)
}

/// Pre-filter for inputs that can never resolve: PO Boxes, addresses with no
/// leading street number, and strings too short to be a county address.
pub fn is_skippable(address: &str) -> bool {
    let addr = address.trim().to_uppercase();

    let collapsed = addr
        .replace('.', "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.contains("PO BOX") || collapsed.contains("POBOX") {
        return true;
    }

    if !addr.starts_with(|c: char| c.is_ascii_digit()) {
        return true;
    }

    addr.chars().count() < 10
}

/// Uppercase, strip unit designators and their argument, drop commas,
/// collapse whitespace into tokens
fn clean_tokens(raw: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut skip_next = false;

    for tok in raw.replace(',', " ").split_whitespace() {
        if skip_next {
            skip_next = false;
            continue;
        }
        let upper = tok.to_uppercase();
        match upper.as_str() {
            "APT" | "UNIT" | "SUITE" | "STE" | "#" => {
                skip_next = true;
                continue;
            }
            _ => {}
        }
        // "#12" style unit in a single token
        if upper.starts_with('#') {
            continue;
        }
        tokens.push(upper);
    }

    tokens
}

/// Primary pattern: NUMBER [PREDIR] NAME.. STREETTYPE [TAIL]
fn parse_primary(tokens: &[String], raw: &str) -> Option<AddressComponents> {
    let number = parse_street_number(tokens)?;
    let has_predir = tokens.len() > 1 && is_predirectional(&tokens[1]);

    // Try with the predirectional consumed first; if no street type follows
    // a non-empty name, retry treating the predirectional token as the name.
    let starts: &[usize] = if has_predir { &[2, 1] } else { &[1] };

    for &name_start in starts {
        // Earliest street-type token with at least one name token before it
        for type_idx in (name_start + 1)..tokens.len() {
            if let Some(canon) = canonical_street_type(&tokens[type_idx]) {
                let predir = (name_start == 2).then(|| tokens[1].clone());
                return Some(AddressComponents {
                    street_number: Some(number.clone()),
                    predirectional: predir,
                    street_name: Some(tokens[name_start..type_idx].join(" ")),
                    street_type: Some(canon.to_string()),
                    city: extract_city(&tokens[type_idx + 1..]),
                    raw: raw.trim().to_string(),
                });
            }
        }
    }

    None
}

/// Secondary pattern for ordinal street names ("5660 N 68TH PL"): the street
/// name is itself a number with an ordinal suffix, followed by a street type
/// from the core vocabulary.
fn parse_ordinal(tokens: &[String], raw: &str) -> Option<AddressComponents> {
    let number = parse_street_number(tokens)?;
    let mut idx = 1;

    let predir = if tokens.len() > idx && is_predirectional(&tokens[idx]) {
        idx += 1;
        Some(tokens[idx - 1].clone())
    } else {
        None
    };

    let name = tokens.get(idx)?;
    if !is_ordinal(name) {
        return None;
    }

    let stype = canonical_street_type(tokens.get(idx + 1)?)?;
    Some(AddressComponents {
        street_number: Some(number),
        predirectional: predir,
        street_name: Some(name.clone()),
        street_type: Some(stype.to_string()),
        city: extract_city(&tokens[idx + 2..]),
        raw: raw.trim().to_string(),
    })
}

fn parse_street_number(tokens: &[String]) -> Option<String> {
    let first = tokens.first()?;
    if !first.is_empty() && first.chars().all(|c| c.is_ascii_digit()) {
        Some(first.clone())
    } else {
        None
    }
}

fn is_predirectional(token: &str) -> bool {
    matches!(token, "N" | "S" | "E" | "W" | "NE" | "NW" | "SE" | "SW")
}

/// "68TH", "1ST", "22ND", "3RD"
fn is_ordinal(token: &str) -> bool {
    let digits: String = token.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return false;
    }
    matches!(&token[digits.len()..], "ST" | "ND" | "RD" | "TH")
}

/// Normalize a street-type token to the abbreviation the parcel layer stores
fn canonical_street_type(token: &str) -> Option<&'static str> {
    let tok = token.trim_end_matches('.');
    Some(match tok {
        "ST" | "STREET" => "ST",
        "AVE" | "AVENUE" => "AVE",
        "RD" | "ROAD" => "RD",
        "DR" | "DRIVE" => "DR",
        "BLVD" | "BOULEVARD" => "BLVD",
        "LN" | "LANE" => "LN",
        "CT" | "COURT" => "CT",
        "PL" | "PLACE" => "PL",
        "WAY" => "WAY",
        "CIR" | "CIRCLE" => "CIR",
        "PLZ" | "PLAZA" => "PLZ",
        "TER" | "TERRACE" => "TER",
        "PKWY" | "PARKWAY" => "PKWY",
        "TRAIL" => "TRAIL",
        "PATH" => "PATH",
        _ => return None,
    })
}

/// First tail token that is not a ZIP or a state designator is the city
fn extract_city(tail: &[String]) -> Option<String> {
    tail.iter()
        .find(|tok| !is_zip(tok) && tok.as_str() != "AZ" && tok.as_str() != "ARIZONA")
        .cloned()
}

fn is_zip(token: &str) -> bool {
    let parts: Vec<&str> = token.splitn(2, '-').collect();
    let five = parts[0];
    if five.len() != 5 || !five.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    match parts.get(1) {
        None => true,
        Some(plus4) => plus4.len() == 4 && plus4.chars().all(|c| c.is_ascii_digit()),
    }
}
