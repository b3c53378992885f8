use lsm_kv::{Engine, Entry};
use test_log::test;

fn keys(range: &lsm_kv::Range) -> lsm_kv::Result<Vec<String>> {
    range
        .into_iter()
        .map(|item| item.map(|entry| String::from_utf8_lossy(&entry.key).to_string()))
        .collect()
}

#[test]
fn engine_range_half_open() -> lsm_kv::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(folder.path(), 1_024 * 1_024)?;

    for key in ["b", "c", "d", "e"] {
        engine.insert(key, key)?;
    }

    assert_eq!(vec!["b", "c"], keys(&engine.range("b".."d")?)?);
    assert_eq!(vec!["b", "c", "d"], keys(&engine.range("b"..="d")?)?);
    assert_eq!(vec!["c", "d", "e"], keys(&engine.range("bb"..)?)?);
    assert_eq!(vec!["b", "c"], keys(&engine.range(.."cc")?)?);
    assert_eq!(4, keys(&engine.iter()?)?.len());

    Ok(())
}

#[test]
fn engine_range_inverted_is_empty() -> lsm_kv::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(folder.path(), 1_024 * 1_024)?;

    for key in ["b", "c", "d", "e"] {
        engine.insert(key, key)?;
    }
    engine.flush()?;
    engine.wait_for_flush()?;

    assert!(keys(&engine.range("d".."b")?)?.is_empty());
    assert!(keys(&engine.range("c".."c")?)?.is_empty());
    assert!(keys(&engine.range("x"..)?)?.is_empty());

    Ok(())
}

#[test]
fn engine_range_across_sources() -> lsm_kv::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(folder.path(), 1_024 * 1_024)?;

    for x in 0u64..30 {
        engine.insert(format!("key{x:03}"), "segment1")?;
    }
    engine.flush()?;
    engine.wait_for_flush()?;

    for x in (0u64..30).step_by(3) {
        engine.insert(format!("key{x:03}"), "segment2")?;
    }
    engine.flush()?;
    engine.wait_for_flush()?;

    for x in (0u64..30).step_by(5) {
        engine.remove(format!("key{x:03}"))?;
    }
    engine.insert("key999", "memtable")?;

    let range = engine.range("key010".."key999")?;
    let items = range.into_iter().collect::<lsm_kv::Result<Vec<_>>>()?;

    assert!(items.windows(2).all(|w| matches!(w, [a, b] if a.key < b.key)));
    assert!(items.iter().all(|x| !x.is_tombstone()));

    let expected = (10u64..30)
        .filter(|x| x % 5 != 0)
        .map(|x| {
            let value = if x % 3 == 0 { "segment2" } else { "segment1" };
            Entry::new(format!("key{x:03}"), value)
        })
        .collect::<Vec<_>>();

    assert_eq!(expected, items);

    Ok(())
}

#[test]
fn engine_range_keeps_rotated_memtable() -> lsm_kv::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(folder.path(), 1_024 * 1_024)?;

    engine.insert("a", "1")?;
    engine.insert("b", "2")?;

    let range = engine.iter()?;

    // The memtable is rotated away, the range still sees it
    engine.flush()?;
    engine.wait_for_flush()?;
    engine.insert("c", "3")?;

    assert_eq!(vec!["a", "b"], keys(&range)?);
    assert_eq!(vec!["a", "b", "c"], keys(&engine.iter()?)?);

    Ok(())
}

#[test]
fn engine_range_sees_writes_into_active_memtable() -> lsm_kv::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(folder.path(), 1_024 * 1_024)?;

    engine.insert("a", "1")?;
    engine.insert("c", "3")?;
    engine.flush()?;
    engine.wait_for_flush()?;

    engine.insert("d", "4")?;

    let range = engine.iter()?;

    // Same memtable the range holds on to
    engine.insert("b", "2")?;
    engine.remove("d")?;

    assert_eq!(vec!["a", "b", "c"], keys(&range)?);

    // Flushes and writes into a newer memtable are not seen
    engine.flush()?;
    engine.wait_for_flush()?;
    engine.insert("e", "5")?;

    assert_eq!(vec!["a", "b", "c"], keys(&range)?);
    assert_eq!(vec!["a", "b", "c", "e"], keys(&engine.iter()?)?);

    Ok(())
}

#[test]
fn engine_range_prefix_keys() -> lsm_kv::Result<()> {
    let folder = tempfile::tempdir()?;
    let engine = Engine::open(folder.path(), 1_024 * 1_024)?;

    for key in ["a", "ab", "abc", "abd", "b"] {
        engine.insert(key, "")?;
    }
    engine.flush()?;
    engine.wait_for_flush()?;

    assert_eq!(vec!["ab", "abc"], keys(&engine.range("ab".."abd")?)?);
    assert_eq!(vec!["abc", "abd"], keys(&engine.range("abc"..="abd")?)?);
    assert_eq!(vec!["a", "ab", "abc", "abd"], keys(&engine.range(.."b")?)?);

    Ok(())
}
