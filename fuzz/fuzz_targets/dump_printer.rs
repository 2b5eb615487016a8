#![no_main]

use libfuzzer_sys::fuzz_target;
use shadowstack::config::{DumpArea, DumpConfig};
use shadowstack::report::DumpPrinter;
use termcolor::NoColor;

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let width = usize::from(data[0] % 64) + 1;
    let address = 0x1000 + usize::from(data[1]);
    let area = match data[2] % 3 {
        0 => DumpArea::Both,
        1 => DumpArea::Actual,
        _ => DumpArea::Shadow,
    };
    let body = &data[3..];
    let (actual, shadow) = body.split_at(body.len() / 2);

    let config = DumpConfig {
        width,
        area,
        hide_equal_lines: data[0] & 0x80 != 0,
        ..DumpConfig::default()
    };
    let mut out = NoColor::new(Vec::new());
    let stats = DumpPrinter::new(&config)
        .dump(&mut out, address, actual, shadow)
        .unwrap();
    assert!(stats.differing_lines <= stats.lines_shown);
});
