// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use bicopilot::dataset::Dataset;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(ds) = Dataset::from_csv_reader("fuzz.csv", data) {
        let _ = ds.infer_schema();
        let _ = ds.describe();
        let _ = ds.describe_objects();
        let _ = ds.duplicated_rows();
        let _ = ds.head_markdown(5);
    }
});
