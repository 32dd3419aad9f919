use std::borrow::Cow;

/// Convert a roman year/semester token (I, II, III, IV, any case) to its arabic digit.
/// Every other token comes back unchanged.
pub fn roman_to_arabic(token: &str) -> Cow<'_, str> {
    let digit = match token.to_ascii_uppercase().as_str() {
        "I" => "1",
        "II" => "2",
        "III" => "3",
        "IV" => "4",
        _ => return Cow::Borrowed(token),
    };
    Cow::Borrowed(digit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_first_four_numerals() {
        assert_eq!(roman_to_arabic("I"), "1");
        assert_eq!(roman_to_arabic("II"), "2");
        assert_eq!(roman_to_arabic("III"), "3");
        assert_eq!(roman_to_arabic("IV"), "4");
    }

    #[test]
    fn lowercase_numerals_are_mapped() {
        assert_eq!(roman_to_arabic("iv"), "4");
        assert_eq!(roman_to_arabic("Ii"), "2");
    }

    #[test]
    fn other_tokens_pass_through() {
        for token in ["V", "3", "R20", "B.Tech", "", "IIII", "Regular"] {
            assert_eq!(roman_to_arabic(token), token);
        }
    }
}
