/// Currency utility functions for subscription amounts
///
/// All monetary values in the database are stored in minor units
/// (1 dollar/N$ = 100 cents) to avoid floating-point precision issues.

/// Convert minor units to major units (divide by 100)
pub fn minor_to_major(minor: i64) -> f64 {
    minor as f64 / 100.0
}

/// Format a minor-unit amount for display, e.g. `N$799.00` or `USD 7.99`
pub fn format_minor(minor: i64, currency: &str) -> String {
    match currency.to_uppercase().as_str() {
        "NAD" => format!("N${:.2}", minor_to_major(minor)),
        other => format!("{} {:.2}", other, minor_to_major(minor)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minor_to_major() {
        assert_eq!(minor_to_major(10000), 100.0);
        assert_eq!(minor_to_major(50), 0.50);
        assert_eq!(minor_to_major(12345), 123.45);
    }

    #[test]
    fn test_format_minor() {
        assert_eq!(format_minor(79900, "NAD"), "N$799.00");
        assert_eq!(format_minor(79900, "nad"), "N$799.00");
        assert_eq!(format_minor(1299, "USD"), "USD 12.99");
    }
}
