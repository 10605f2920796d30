//! Financial modelling styles and number formats
//!
//! Conventions: blue text for hardcoded inputs, black for formulas,
//! yellow fill for key assumptions.

use crate::error::{GuardError, GuardResult};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatPattern};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const COLOR_INPUT: u32 = 0x0000FF;
pub const COLOR_FORMULA: u32 = 0x000000;
pub const COLOR_ASSUMPTION: u32 = 0xFFFF00;

pub const FORMAT_CURRENCY: &str = "$#,##0_);[Red]($#,##0)";
pub const FORMAT_CURRENCY_DECIMALS: &str = "$#,##0.00_);[Red]($#,##0.00)";
pub const FORMAT_CURRENCY_MM: &str = "$#,##0.0,,_);[Red]($#,##0.0,,)";
pub const FORMAT_PERCENT: &str = "0.0%";
pub const FORMAT_PERCENT_INT: &str = "0%";
pub const FORMAT_YEAR: &str = "@";
pub const FORMAT_MULTIPLE: &str = "0.0x";
pub const FORMAT_NUMBER: &str = "#,##0";
pub const FORMAT_NUMBER_DECIMALS: &str = "#,##0.00";
pub const FORMAT_DATE: &str = "mm/dd/yyyy";
pub const FORMAT_ACCOUNTING: &str = "_($* #,##0_);_($* (#,##0);_($* \"-\"_);_(@_)";

/// Named cell styles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CellStyle {
    #[serde(rename = "FinancialInput", alias = "input")]
    Input,
    #[serde(rename = "FinancialFormula", alias = "formula")]
    Formula,
    #[serde(rename = "FinancialAssumption", alias = "assumption")]
    Assumption,
}

impl CellStyle {
    pub fn name(&self) -> &'static str {
        match self {
            CellStyle::Input => "FinancialInput",
            CellStyle::Formula => "FinancialFormula",
            CellStyle::Assumption => "FinancialAssumption",
        }
    }

    /// xlsxwriter format for this style
    pub fn format(&self) -> Format {
        match self {
            CellStyle::Input => Format::new()
                .set_font_color(Color::RGB(COLOR_INPUT))
                .set_align(FormatAlign::Left),
            CellStyle::Formula => Format::new()
                .set_font_color(Color::RGB(COLOR_FORMULA))
                .set_align(FormatAlign::Right),
            CellStyle::Assumption => Format::new()
                .set_pattern(FormatPattern::Solid)
                .set_background_color(Color::RGB(COLOR_ASSUMPTION))
                .set_font_color(Color::RGB(0x000000))
                .set_bold()
                .set_align(FormatAlign::Center),
        }
    }
}

impl fmt::Display for CellStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CellStyle {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "input" | "financialinput" => Ok(CellStyle::Input),
            "formula" | "financialformula" => Ok(CellStyle::Formula),
            "assumption" | "financialassumption" => Ok(CellStyle::Assumption),
            _ => Err(GuardError::Structure(format!(
                "Unknown style: {}. Available: input, formula, assumption",
                s
            ))),
        }
    }
}

/// Combined format for a cell's style and number format, if it has either
pub fn cell_format(style: Option<CellStyle>, number_format: Option<&str>) -> Option<Format> {
    let format = match (style, number_format) {
        (None, None) => return None,
        (Some(style), None) => style.format(),
        (None, Some(num)) => Format::new().set_num_format(num),
        (Some(style), Some(num)) => style.format().set_num_format(num),
    };
    Some(format)
}

/// Standard number format by type.
///
/// `decimals > 0` selects the decimal variant where one exists.
pub fn number_format(format_type: &str, decimals: u32) -> GuardResult<&'static str> {
    let format = match format_type {
        "currency" if decimals > 0 => FORMAT_CURRENCY_DECIMALS,
        "currency" => FORMAT_CURRENCY,
        "currency_mm" => FORMAT_CURRENCY_MM,
        "percent" if decimals > 0 => FORMAT_PERCENT,
        "percent" => FORMAT_PERCENT_INT,
        "multiple" => FORMAT_MULTIPLE,
        "year" => FORMAT_YEAR,
        "number" if decimals > 0 => FORMAT_NUMBER_DECIMALS,
        "number" => FORMAT_NUMBER,
        "accounting" => FORMAT_ACCOUNTING,
        "date" => FORMAT_DATE,
        other => {
            return Err(GuardError::Structure(format!(
                "Unknown format_type: {}. Available: currency, currency_mm, percent, multiple, year, number, accounting, date",
                other
            )))
        }
    };
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_format_variants() {
        assert_eq!(number_format("currency", 2).unwrap(), FORMAT_CURRENCY_DECIMALS);
        assert_eq!(number_format("currency", 0).unwrap(), FORMAT_CURRENCY);
        assert_eq!(number_format("percent", 1).unwrap(), "0.0%");
        assert_eq!(number_format("percent", 0).unwrap(), "0%");
        assert_eq!(number_format("date", 2).unwrap(), "mm/dd/yyyy");
        assert!(number_format("roman", 0).is_err());
    }

    #[test]
    fn test_style_parse() {
        assert_eq!("Input".parse::<CellStyle>().unwrap(), CellStyle::Input);
        assert_eq!(
            "FinancialAssumption".parse::<CellStyle>().unwrap(),
            CellStyle::Assumption
        );
        assert!("fancy".parse::<CellStyle>().is_err());
    }

    #[test]
    fn test_cell_format_only_when_needed() {
        assert!(cell_format(None, None).is_none());
        assert!(cell_format(Some(CellStyle::Formula), None).is_some());
        assert!(cell_format(None, Some(FORMAT_PERCENT)).is_some());
    }

    #[test]
    fn test_style_serde_names() {
        let json = serde_json::to_string(&CellStyle::Input).unwrap();
        assert_eq!(json, "\"FinancialInput\"");
        let parsed: CellStyle = serde_json::from_str("\"assumption\"").unwrap();
        assert_eq!(parsed, CellStyle::Assumption);
    }
}
