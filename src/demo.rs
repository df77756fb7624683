use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::loader::InputFiles;

/// Six plans in the CMS pipe-delimited layout. Three share a formulary that
/// lists Ozempic on tier 2 without prior authorization; the other three share
/// one that lists Wegovy on tier 4 behind prior authorization and a quantity
/// limit.
pub const PLAN_INFO: &str = "\
CONTRACT_ID|PLAN_ID|PLAN_NAME|PLAN_TYPE|ORGANIZATION_NAME|FORMULARY_ID
H1001|001|Evergreen Advantage Core|MAPD|Evergreen Health|00024101
H1001|002|Evergreen Advantage Plus|MAPD|Evergreen Health|00024101
H1001|003|Evergreen Advantage Select|MAPD|Evergreen Health|00024101
S2001|001|Summit Rx Basic|PDP|Summit Rx|00024201
S2001|002|Summit Rx Enhanced|PDP|Summit Rx|00024201
S2001|003|Summit Rx Value|PDP|Summit Rx|00024201
";

pub const FORMULARY: &str = "\
FORMULARY_ID|NDC|TIER_LEVEL_VALUE|PRIOR_AUTHORIZATION_YN|STEP_THERAPY_YN|QUANTITY_LIMIT_YN|QUANTITY_LIMIT_AMOUNT|QUANTITY_LIMIT_DAYS
00024101|00169406001|2|N|N|N||
00024101|00169396701|3|N|N|N||
00024101|00093105801|1|N|N|N||
00024201|00169451701|4|Y|N|Y|4|28
00024201|00169453001|4|Y|N|Y|4|28
00024201|00093105801|1|N|N|N||
";

pub const BENEFICIARY_COST: &str = "\
CONTRACT_ID|PLAN_ID|TIER|COVERAGE_LEVEL|DAYS_SUPPLY|COST_TYPE_PREF|COST_AMT_PREF|COST_AMT_NONPREF|COST_AMT_MAIL_PREF
H1001|001|2|0|1|1|$100.00|$100.00|$100.00
H1001|001|2|1|1|1|$47.00|$52.00|$94.00
H1001|002|2|1|1|1|$47.00|$52.00|$94.00
H1001|003|2|1|1|1|$47.00|$52.00|$94.00
S2001|001|4|1|1|2|0.25|0.30|0.25
S2001|002|4|1|1|2|0.25|0.30|0.25
S2001|003|4|1|1|2|0.25|0.30|0.25
S2001|003|4|1|2|2|0.25|0.30|0.25
";

fn with_path(path: &Path) -> impl FnOnce(io::Error) -> io::Error + '_ {
    move |err| io::Error::new(err.kind(), format!("{}: {err}", path.display()))
}

/// Writes the demo tables under the standard CMS file names and returns
/// their paths.
pub fn write_to_dir(dir: &Path) -> io::Result<InputFiles> {
    fs::create_dir_all(dir).map_err(with_path(dir))?;
    let files = InputFiles::from_dir(dir);
    let tables: [(&PathBuf, &str); 3] = [
        (&files.plan_info, PLAN_INFO),
        (&files.formulary, FORMULARY),
        (&files.cost, BENEFICIARY_COST),
    ];
    for (path, contents) in tables {
        fs::write(path, contents).map_err(with_path(path))?;
    }
    tracing::info!("Wrote demo inputs to {}", dir.display());
    Ok(files)
}
