//! `svbridge params`: list the accepted engine settings.

use svbridge_core::EngineParam;

/// One line per setter: short name, exported symbol and the range a
/// percentage maps onto, if any.
pub fn render() -> String {
    let mut out = format!("{:<12} {:<22} {}\n", "NAME", "SYMBOL", "PERCENT RANGE");
    for param in EngineParam::ALL {
        let range = param
            .percent_range()
            .map_or_else(|| "-".to_string(), |(min, max)| format!("{min}..={max}"));
        out.push_str(&format!(
            "{:<12} {:<22} {range}\n",
            param.short_name(),
            param.symbol()
        ));
    }
    out
}

pub fn execute() {
    print!("{}", render());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_setter_is_listed() {
        let table = render();
        assert_eq!(table.lines().count(), EngineParam::ALL.len() + 1);
        assert!(table.contains("sv_setRate"));
        assert!(table.lines().any(|l| l.starts_with("rate") && l.ends_with("20..=500")));
        assert!(table.lines().any(|l| l.starts_with("voice") && l.ends_with('-')));
    }
}
