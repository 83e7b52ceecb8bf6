use tempfile::NamedTempFile;
use vaultfs::{EngineConfig, Engine, FileDevice};

fn temp_device(_size: u64) -> (NamedTempFile, std::path::PathBuf) {
    let file = NamedTempFile::new().unwrap();
    let path = file.path().to_path_buf();
    (file, path)
}

#[test]
fn write_and_read_round_trips_on_file_backed_device() {
    let (_guard, path) = temp_device(1 << 20);
    let device = FileDevice::create(&path, 1 << 20).unwrap();
    let engine = Engine::open(device, EngineConfig::default()).unwrap();

    let data = b"Hello, World! This is a test file.".to_vec();
    let id = engine.write("greeting.txt", "alice", &data, None).unwrap();
    assert_eq!(engine.read(id).unwrap(), data);
}

#[test]
fn state_survives_reopen_of_the_same_file() {
    let (_guard, path) = temp_device(1 << 20);
    let config = EngineConfig::default();

    let id = {
        let device = FileDevice::create(&path, 1 << 20).unwrap();
        let engine = Engine::open(device, config.clone()).unwrap();
        engine.write("doc.txt", "bob", b"persisted across reopen", None).unwrap()
    };

    let device = FileDevice::open(&path).unwrap();
    let engine = Engine::open(device, config).unwrap();
    assert_eq!(engine.read(id).unwrap(), b"persisted across reopen");
}

#[test]
fn object_of_exactly_chunk_size_writes_one_chunk() {
    let (_guard, path) = temp_device(1 << 20);
    let device = FileDevice::create(&path, 1 << 20).unwrap();
    let config = EngineConfig::default();
    let chunk_size = config.chunk_size;
    let engine = Engine::open(device, config).unwrap();

    let data = vec![1u8; chunk_size];
    let id = engine.write("exact.bin", "alice", &data, None).unwrap();
    let records = engine.list(&Default::default());
    let record = records.iter().find(|r| r.id == id).unwrap();
    assert_eq!(record.chunk_ids.len(), 1);
}

#[test]
fn object_one_byte_over_chunk_size_writes_two_chunks_second_is_one_byte() {
    let (_guard, path) = temp_device(1 << 20);
    let device = FileDevice::create(&path, 1 << 20).unwrap();
    let config = EngineConfig::default();
    let chunk_size = config.chunk_size;
    let engine = Engine::open(device, config).unwrap();

    let data = vec![2u8; chunk_size + 1];
    let id = engine.write("over.bin", "alice", &data, None).unwrap();
    assert_eq!(engine.read(id).unwrap(), data);

    let records = engine.list(&Default::default());
    let record = records.iter().find(|r| r.id == id).unwrap();
    assert_eq!(record.chunk_ids.len(), 2);
}

#[test]
fn empty_object_has_no_chunks_and_empty_checksum() {
    let (_guard, path) = temp_device(1 << 20);
    let device = FileDevice::create(&path, 1 << 20).unwrap();
    let engine = Engine::open(device, EngineConfig::default()).unwrap();

    let id = engine.write("empty", "alice", b"", None).unwrap();
    let records = engine.list(&Default::default());
    let record = records.iter().find(|r| r.id == id).unwrap();
    assert!(record.chunk_ids.is_empty());
    assert_eq!(record.checksum, vaultfs::digest::sha256(b""));
    assert_eq!(engine.read(id).unwrap(), b"");
}

#[test]
fn integrity_scan_on_clean_device_reports_zero_corruption() {
    let (_guard, path) = temp_device(1 << 20);
    let device = FileDevice::create(&path, 1 << 20).unwrap();
    let engine = Engine::open(device, EngineConfig::default()).unwrap();

    engine.write("a", "alice", b"some bytes", None).unwrap();
    engine.write("b", "alice", b"some more bytes", None).unwrap();

    let report = engine.integrity_scan();
    assert_eq!(report.files_corrupted, 0);
    assert_eq!(report.chunks_corrupted, 0);
}

#[test]
fn delete_frees_extents_and_removes_from_index() {
    let (_guard, path) = temp_device(1 << 20);
    let device = FileDevice::create(&path, 1 << 20).unwrap();
    let engine = Engine::open(device, EngineConfig::default()).unwrap();

    let id = engine.write("to-delete.bin", "alice", &vec![9u8; 5000], None).unwrap();
    engine.delete(id).unwrap();

    assert!(engine.read(id).is_err());
    assert!(engine.list(&Default::default()).is_empty());
}
