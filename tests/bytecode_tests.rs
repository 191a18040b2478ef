//! Bytecode container round trips, through memory and through disk

use akkado::bytecode::{dump_listing, BytecodeFile};
use akkado::compile;
use std::io::Write;

fn compiled_file(source: &str) -> BytecodeFile {
    let result = compile(source, "<test>");
    assert!(result.success, "diagnostics: {:?}", result.diagnostics);
    BytecodeFile {
        instructions: result.instructions,
        state_inits: result.state_inits,
        required_samples: result.required_samples,
    }
}

#[test]
fn test_roundtrip_through_disk() {
    let file = compiled_file(
        r#"
        pat("bd ~ sn ~") |> out(%)
        saw(110) |> lp(%, 900, 0.6) |> out(%, %)
        "#,
    );

    let bytes = file.encode();

    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&bytes).unwrap();
    tmp.flush().unwrap();

    let read_back = std::fs::read(tmp.path()).unwrap();
    assert_eq!(read_back, bytes);

    let decoded = BytecodeFile::decode(&read_back).unwrap();
    assert_eq!(decoded.instructions, file.instructions);
    assert_eq!(decoded.required_samples, file.required_samples);
    assert_eq!(decoded.state_inits.len(), file.state_inits.len());

    // Byte-exact: re-encoding the decoded container is identical
    assert_eq!(decoded.encode(), bytes);
}

#[test]
fn test_instruction_wire_size() {
    let file = compiled_file("saw(440)");
    let bytes = file.encode();
    // Header is 18 bytes: magic(4) + version(2) + three u32 counts
    assert_eq!(bytes.len(), 18 + file.instructions.len() * 20);
}

#[test]
fn test_dump_names_opcodes() {
    let file = compiled_file("saw(440) |> lp(%, 1000, 0.7) |> out(%, %)");
    let listing = dump_listing(&file);

    assert!(listing.contains("PUSH_CONST"));
    assert!(listing.contains("OSC_SAW"));
    assert!(listing.contains("FILTER_SVF_LP"));
    assert!(listing.contains("OUTPUT"));
    assert!(listing.contains("value=440"));
    assert!(listing.contains("state=0x"));
}

#[test]
fn test_truncated_file_rejected() {
    let file = compiled_file("saw(440)");
    let bytes = file.encode();
    assert!(BytecodeFile::decode(&bytes[..bytes.len() - 5]).is_err());
}

#[test]
fn test_empty_program_container() {
    let file = BytecodeFile::default();
    let decoded = BytecodeFile::decode(&file.encode()).unwrap();
    assert!(decoded.instructions.is_empty());
}
