use std::collections::BTreeSet;
use std::sync::Arc;

use olap_read_engine::field_type::FieldType;
use olap_read_engine::io::{FileWriter, LocalFileReader, LocalFileWriter, MemFile};
use olap_read_engine::{IndexOptions, PrimaryKeyIndexBuilder, PrimaryKeyIndexReader};

fn build_on_disk(dir: &tempfile::TempDir, keys: &[Vec<u8>], options: IndexOptions) -> PrimaryKeyIndexReader {
    let path = dir.path().join("pk.idx");
    let mut writer = LocalFileWriter::create(&path).unwrap();
    let meta = {
        let mut builder = PrimaryKeyIndexBuilder::new(&mut writer, options);
        builder.init().unwrap();
        for k in keys {
            builder.add_item(k).unwrap();
        }
        builder.finalize().unwrap()
    };
    writer.close().unwrap();

    let file = Arc::new(LocalFileReader::open(&path).unwrap());
    PrimaryKeyIndexReader::parse(file, &meta).unwrap()
}

#[test]
fn string_keys_step_two() {
    let keys: Vec<Vec<u8>> = (1000..10000).step_by(2).map(|i| i.to_string().into_bytes()).collect();
    assert_eq!(keys.len(), 4500);

    let file = MemFile::new();
    let mut w = file.writer();
    let mut builder = PrimaryKeyIndexBuilder::new(&mut w, IndexOptions::default().page_size(4096));
    builder.init().unwrap();
    for k in &keys {
        builder.add_item(k).unwrap();
    }
    assert_eq!(builder.min_key(), Some(&b"1000"[..]));
    assert_eq!(builder.max_key(), Some(&b"9998"[..]));
    assert_eq!(builder.num_rows(), 4500);
    let meta = builder.finalize().unwrap();
    assert_eq!(meta.min_key, b"1000");
    assert_eq!(meta.max_key, b"9998");

    let reader = PrimaryKeyIndexReader::parse(file.reader(), &meta).unwrap();
    assert_eq!(reader.num_rows(), 4500);
    assert_eq!(reader.type_info(), FieldType::Bytes);

    let mut it = reader.new_iterator();
    for (i, k) in keys.iter().enumerate() {
        assert!(reader.check_present(k));
        assert!(it.seek_at_or_after(k).unwrap(), "key {}", String::from_utf8_lossy(k));
        assert_eq!(it.current_ordinal().unwrap(), i as u32);
    }

    assert!(!it.seek_at_or_after(b"8701").unwrap());
    assert_eq!(it.current_ordinal().unwrap(), 3851);
    assert_eq!(it.current_key(), Some(&b"8702"[..]));

    assert!(!it.seek_at_or_after(b"87").unwrap());
    assert_eq!(it.current_ordinal().unwrap(), 3850);

    assert!(!it.seek_at_or_after(b"0").unwrap());
    assert_eq!(it.current_ordinal().unwrap(), 0);

    assert!(it.seek_at_or_after(b"9999").unwrap_err().is_not_found());
}

#[test]
fn random_keys_on_disk() {
    let mut rng = fastrand::Rng::with_seed(0x5eed);
    let mut set = BTreeSet::new();
    while set.len() < 3000 {
        let len = rng.usize(1..16);
        set.insert((0..len).map(|_| rng.alphanumeric() as u8).collect::<Vec<u8>>());
    }
    let keys: Vec<Vec<u8>> = set.into_iter().collect();

    let dir = tempfile::tempdir().unwrap();
    let options = IndexOptions::default().page_size(512).expected_rows(keys.len());
    let reader = build_on_disk(&dir, &keys, options);

    let mut it = reader.new_iterator();
    for (i, k) in keys.iter().enumerate() {
        assert!(reader.check_present(k));
        assert!(it.seek_at_or_after(k).unwrap());
        assert_eq!(it.current_ordinal().unwrap(), i as u32);
    }

    // 随机探测：行号随 key 单调，且等于第一个 >= 查询 key 的位置
    let mut lookups: Vec<Vec<u8>> = (0..500)
        .map(|_| {
            let len = rng.usize(1..16);
            (0..len).map(|_| rng.alphanumeric() as u8).collect()
        })
        .collect();
    lookups.sort();
    let mut last = 0u32;
    for p in &lookups {
        let expected = keys.partition_point(|k| k < p);
        match it.seek_at_or_after(p) {
            Ok(exact) => {
                let ord = it.current_ordinal().unwrap();
                assert_eq!(ord as usize, expected);
                assert_eq!(exact, keys[expected] == *p);
                assert!(ord >= last);
                last = ord;
            }
            Err(e) => {
                assert!(e.is_not_found());
                assert_eq!(expected, keys.len());
            }
        }
    }

    let absent_hits = lookups.iter()
        .filter(|p| keys.binary_search(p).is_err())
        .filter(|p| reader.check_present(p))
        .count();
    assert!(absent_hits < lookups.len() / 5, "bloom filter too noisy: {absent_hits}");
}
