use std::{collections::HashMap, fmt, fs::File, io::Read, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    columns::{Column, ColumnAliases},
    error::{Diagnostics, LoadError, SkipReason, TableKind},
    table::{Delimiter, Table},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indication {
    Diabetes,
    Obesity,
}

impl Indication {
    pub fn as_str(self) -> &'static str {
        match self {
            Indication::Diabetes => "diabetes",
            Indication::Obesity => "obesity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "diabetes" | "t2d" | "type 2 diabetes" | "type_2_diabetes" => {
                Some(Indication::Diabetes)
            }
            "obesity" | "weight management" | "chronic weight management" | "weight_loss" => {
                Some(Indication::Obesity)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Indication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An 11-digit (5-4-2) National Drug Code without separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ndc(String);

impl Ndc {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ndc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Normalizes the NDC spellings found in formulary files to 11 digits.
///
/// Hyphenated codes use the labeler-product-package segment layout, and the
/// short segment is left-padded (4-4-2, 5-3-2 and 5-4-1 all become 5-4-2).
/// Bare digit strings of 9 to 11 characters are left-padded with zeros, which
/// also repairs codes whose leading zeros were lost to a numeric column.
pub fn normalize_ndc(raw: &str) -> Option<Ndc> {
    let trimmed = raw.trim();
    if trimmed.contains('-') {
        let parts: Vec<&str> = trimmed.split('-').map(str::trim).collect();
        if parts.len() != 3 || !parts.iter().all(|p| all_digits(p)) {
            return None;
        }
        let (labeler, product, package) = (parts[0], parts[1], parts[2]);
        let code = match (labeler.len(), product.len(), package.len()) {
            (5, 4, 2) => format!("{labeler}{product}{package}"),
            (4, 4, 2) => format!("0{labeler}{product}{package}"),
            (5, 3, 2) => format!("{labeler}0{product}{package}"),
            (5, 4, 1) => format!("{labeler}{product}0{package}"),
            _ => return None,
        };
        return Some(Ndc(code));
    }

    let digits: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    if !all_digits(&digits) || !(9..=11).contains(&digits.len()) {
        return None;
    }
    Some(Ndc(format!("{digits:0>11}")))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub name: String,
    pub molecule: String,
    pub indication: Indication,
    pub manufacturer: String,
    pub ndcs: Vec<Ndc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdcResolution<'a> {
    Product(&'a Product),
    Ambiguous,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NdcSlot {
    One(usize),
    Ambiguous,
}

struct BuiltinProduct {
    name: &'static str,
    molecule: &'static str,
    indication: Indication,
    manufacturer: &'static str,
    ndcs: &'static [&'static str],
}

const BUILTIN_PRODUCTS: &[BuiltinProduct] = &[
    BuiltinProduct {
        name: "Wegovy",
        molecule: "semaglutide",
        indication: Indication::Obesity,
        manufacturer: "Novo Nordisk",
        ndcs: &[
            "00169451701",
            "00169453001",
            "00169457401",
            "00169459301",
            "00169476401",
        ],
    },
    BuiltinProduct {
        name: "Ozempic",
        molecule: "semaglutide",
        indication: Indication::Diabetes,
        manufacturer: "Novo Nordisk",
        ndcs: &["00169406001", "00169396701", "00169482301"],
    },
    BuiltinProduct {
        name: "Zepbound",
        molecule: "tirzepatide",
        indication: Indication::Obesity,
        manufacturer: "Eli Lilly",
        ndcs: &[
            "00002466601",
            "00002466701",
            "00002466801",
            "00002466901",
            "00002467001",
            "00002467101",
        ],
    },
    BuiltinProduct {
        name: "Mounjaro",
        molecule: "tirzepatide",
        indication: Indication::Diabetes,
        manufacturer: "Eli Lilly",
        ndcs: &[
            "00002230001",
            "00002240001",
            "00002250001",
            "00002260001",
            "00002270001",
            "00002280001",
        ],
    },
];

/// Immutable NDC → product reference data. Build it once and hand it to the
/// loaders and the extractor by reference.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: Vec<Product>,
    by_ndc: HashMap<Ndc, NdcSlot>,
}

impl ProductCatalog {
    /// The GLP-1 products tracked by default.
    pub fn builtin() -> Self {
        let products = BUILTIN_PRODUCTS
            .iter()
            .map(|p| Product {
                name: p.name.to_string(),
                molecule: p.molecule.to_string(),
                indication: p.indication,
                manufacturer: p.manufacturer.to_string(),
                ndcs: p.ndcs.iter().filter_map(|ndc| normalize_ndc(ndc)).collect(),
            })
            .collect();
        Self::from_products(products)
    }

    pub fn from_products(products: Vec<Product>) -> Self {
        let mut by_ndc: HashMap<Ndc, NdcSlot> = HashMap::new();
        for (idx, product) in products.iter().enumerate() {
            for ndc in &product.ndcs {
                by_ndc
                    .entry(ndc.clone())
                    .and_modify(|slot| {
                        if *slot != NdcSlot::One(idx) {
                            *slot = NdcSlot::Ambiguous;
                        }
                    })
                    .or_insert(NdcSlot::One(idx));
            }
        }
        Self { products, by_ndc }
    }

    /// Loads a reference list with one row per NDC
    /// (`ndc, product, molecule, indication[, manufacturer]`). Rows naming the
    /// same product are merged; the first row fixes its attributes.
    pub fn from_reader<R: Read>(
        source: R,
        delimiter: Delimiter,
        aliases: &ColumnAliases,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, LoadError> {
        let table = Table::open(source, TableKind::Catalog, delimiter, aliases)?;
        for column in [Column::Ndc, Column::Product, Column::Molecule, Column::Indication] {
            table.headers().require(column, aliases)?;
        }

        let mut products: Vec<Product> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        table.for_each_row(diagnostics, |headers, row| {
            let raw_ndc = headers.required(row, Column::Ndc)?;
            let ndc = normalize_ndc(raw_ndc).ok_or_else(|| SkipReason::InvalidValue {
                column: Column::Ndc,
                value: raw_ndc.to_string(),
            })?;
            let name = headers.required(row, Column::Product)?;
            let molecule = headers.required(row, Column::Molecule)?;
            let raw_indication = headers.required(row, Column::Indication)?;
            let indication =
                Indication::parse(raw_indication).ok_or_else(|| SkipReason::InvalidValue {
                    column: Column::Indication,
                    value: raw_indication.to_string(),
                })?;
            let manufacturer = headers.text(row, Column::Manufacturer).unwrap_or_default();

            let idx = *index.entry(name.to_string()).or_insert_with(|| {
                products.push(Product {
                    name: name.to_string(),
                    molecule: molecule.to_ascii_lowercase(),
                    indication,
                    manufacturer: manufacturer.to_string(),
                    ndcs: Vec::new(),
                });
                products.len() - 1
            });
            let product = &mut products[idx];
            if product.ndcs.contains(&ndc) {
                return Err(SkipReason::Duplicate);
            }
            product.ndcs.push(ndc);
            Ok(())
        })?;

        tracing::info!("Loaded {} products from NDC reference list", products.len());
        Ok(Self::from_products(products))
    }

    pub fn from_path(
        path: &Path,
        delimiter: Delimiter,
        aliases: &ColumnAliases,
        diagnostics: &mut Diagnostics,
    ) -> Result<Self, LoadError> {
        let file = File::open(path).map_err(|source| LoadError::Open {
            table: TableKind::Catalog,
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(file, delimiter, aliases, diagnostics)
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.iter()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn product(&self, name: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.name == name)
    }

    /// True for any NDC the catalog lists, ambiguous ones included.
    pub fn contains(&self, ndc: &Ndc) -> bool {
        self.by_ndc.contains_key(ndc)
    }

    pub fn resolve(&self, ndc: &Ndc) -> NdcResolution<'_> {
        match self.by_ndc.get(ndc) {
            Some(NdcSlot::One(idx)) => NdcResolution::Product(&self.products[*idx]),
            Some(NdcSlot::Ambiguous) => NdcResolution::Ambiguous,
            None => NdcResolution::Unknown,
        }
    }
}
