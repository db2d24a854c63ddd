//! State FIPS codes and postal abbreviations.

/// (FIPS, USPS abbreviation, name)
const STATES: &[(&str, &str, &str)] = &[
    ("01", "AL", "Alabama"),
    ("02", "AK", "Alaska"),
    ("04", "AZ", "Arizona"),
    ("05", "AR", "Arkansas"),
    ("06", "CA", "California"),
    ("08", "CO", "Colorado"),
    ("09", "CT", "Connecticut"),
    ("10", "DE", "Delaware"),
    ("11", "DC", "District of Columbia"),
    ("12", "FL", "Florida"),
    ("13", "GA", "Georgia"),
    ("15", "HI", "Hawaii"),
    ("16", "ID", "Idaho"),
    ("17", "IL", "Illinois"),
    ("18", "IN", "Indiana"),
    ("19", "IA", "Iowa"),
    ("20", "KS", "Kansas"),
    ("21", "KY", "Kentucky"),
    ("22", "LA", "Louisiana"),
    ("23", "ME", "Maine"),
    ("24", "MD", "Maryland"),
    ("25", "MA", "Massachusetts"),
    ("26", "MI", "Michigan"),
    ("27", "MN", "Minnesota"),
    ("28", "MS", "Mississippi"),
    ("29", "MO", "Missouri"),
    ("30", "MT", "Montana"),
    ("31", "NE", "Nebraska"),
    ("32", "NV", "Nevada"),
    ("33", "NH", "New Hampshire"),
    ("34", "NJ", "New Jersey"),
    ("35", "NM", "New Mexico"),
    ("36", "NY", "New York"),
    ("37", "NC", "North Carolina"),
    ("38", "ND", "North Dakota"),
    ("39", "OH", "Ohio"),
    ("40", "OK", "Oklahoma"),
    ("41", "OR", "Oregon"),
    ("42", "PA", "Pennsylvania"),
    ("44", "RI", "Rhode Island"),
    ("45", "SC", "South Carolina"),
    ("46", "SD", "South Dakota"),
    ("47", "TN", "Tennessee"),
    ("48", "TX", "Texas"),
    ("49", "UT", "Utah"),
    ("50", "VT", "Vermont"),
    ("51", "VA", "Virginia"),
    ("53", "WA", "Washington"),
    ("54", "WV", "West Virginia"),
    ("55", "WI", "Wisconsin"),
    ("56", "WY", "Wyoming"),
    ("72", "PR", "Puerto Rico"),
];

/// Resolve a FIPS code, postal abbreviation, or full name to the 2-digit FIPS code.
pub fn state_fips(input: &str) -> Option<&'static str> {
    let needle = input.trim();
    let padded = if needle.len() == 1 && needle.chars().all(|c| c.is_ascii_digit()) {
        format!("0{needle}")
    } else {
        needle.to_string()
    };
    STATES
        .iter()
        .find(|(fips, abbr, name)| {
            *fips == padded || abbr.eq_ignore_ascii_case(needle) || name.eq_ignore_ascii_case(needle)
        })
        .map(|(fips, _, _)| *fips)
}

/// Full state name for a FIPS code.
pub fn state_name(fips: &str) -> Option<&'static str> {
    STATES.iter().find(|(f, _, _)| *f == fips).map(|(_, _, n)| *n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_lookup_forms() {
        assert_eq!(state_fips("55"), Some("55"));
        assert_eq!(state_fips("wi"), Some("55"));
        assert_eq!(state_fips("Wisconsin"), Some("55"));
        assert_eq!(state_fips("6"), Some("06"));
        assert_eq!(state_fips("district of columbia"), Some("11"));
        assert_eq!(state_fips("Atlantis"), None);
        assert_eq!(state_fips("03"), None);
    }

    #[test]
    fn test_state_name() {
        assert_eq!(state_name("72"), Some("Puerto Rico"));
        assert_eq!(state_name("99"), None);
    }
}
