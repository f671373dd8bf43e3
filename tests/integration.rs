//! End-to-end tests: gzip source files through rebuild, lookups and queries.

use flate2::write::GzEncoder;
use flate2::Compression;
use rirdex::{
    rebuild_index, Error, IndexConfig, IndexMetadata, IndexStore, LoadObserver, LoadProgress,
    LogObserver, Query, Registry, Row, SourceFile,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, TempDir};

const ARIN: &str = "\
2|arin|20240101|9|19700101|20240101|-0500
arin|*|asn|*|3|summary
arin|*|ipv4|*|4|summary
arin|US|asn|64500|1|20100101|assigned|ORG-ALPHA
arin|US|asn|64512|1024|20100101|allocated|ORG-ALPHA
arin|US|ipv4|192.0.2.0|256|20100101|assigned|ORG-ALPHA
arin|US|ipv4|not-an-ip|256|20100101|assigned|ORG-BRAVO
arin|US|ipv4|198.51.100.0|128|20100101|allocated|ORG-BRAVO
arin|US|ipv4|203.0.113.0|128|20100101|reserved|
arin|US|ipv6|2001:db8::|32|20100101|allocated|ORG-ALPHA
arin|US|dns|example|1|20100101|assigned|ORG-ALPHA
arin||asn|64496|1||available|
";

const RIPE: &str = "\
# RIPE NCC extended delegation
2.3|ripencc|20240101|4|19830705|20240101|+0100
ripencc|*|ipv4|*|2|summary
ripencc|NL|ipv4|203.0.113.128|64|20150101|allocated|ORG-CHARLIE
ripencc|NL|ipv4|233.252.0.0|768|20150101|assigned|ORG-CHARLIE
ripencc|DE|asn|200000|8|20150101|assigned|ORG-CHARLIE
ripencc|DE|ipv6|3fff::|20|20150101|allocated|ORG-CHARLIE
";

const AS_NAMES: &str = "\
64500 ALPHA-AS Alpha Hosting, US
64512 ALPHA-BLOCK Alpha Hosting, US
64513 ALPHA-BLOCK Alpha Hosting, US
64514 ALPHA-BLOCK Alpha Hosting, US
200000 CHARLIE-NET Charlie BV, DE
200001 CHARLIE-NET Charlie BV, DE
300000 NO-DELEGATION Nobody
";

/// Rows accepted from the two delegation files, in load order.
const INDEXED: [&str; 9] = [
    "arin|US|asn|64500|1|20100101|assigned|ORG-ALPHA",
    "arin|US|asn|64512|1024|20100101|allocated|ORG-ALPHA",
    "arin|US|ipv4|192.0.2.0|256|20100101|assigned|ORG-ALPHA",
    "arin|US|ipv4|198.51.100.0|128|20100101|allocated|ORG-BRAVO",
    "arin|US|ipv6|2001:db8::|32|20100101|allocated|ORG-ALPHA",
    "ripencc|NL|ipv4|203.0.113.128|64|20150101|allocated|ORG-CHARLIE",
    "ripencc|NL|ipv4|233.252.0.0|768|20150101|assigned|ORG-CHARLIE",
    "ripencc|DE|asn|200000|8|20150101|assigned|ORG-CHARLIE",
    "ripencc|DE|ipv6|3fff::|20|20150101|allocated|ORG-CHARLIE",
];

fn write_gz(path: &Path, text: &str) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn fixture_sources(dir: &Path) -> Vec<SourceFile> {
    let sources = vec![
        SourceFile::delegations(Registry::Arin, dir),
        SourceFile::delegations(Registry::RipeNcc, dir),
        SourceFile::as_names(dir),
    ];
    write_gz(&sources[0].path, ARIN);
    write_gz(&sources[1].path, RIPE);
    write_gz(&sources[2].path, AS_NAMES);
    sources
}

fn test_config(dir: &Path) -> IndexConfig {
    IndexConfig::new(dir)
        .with_map_size(64 * 1024 * 1024)
        .with_progress_every(2)
}

fn build() -> (TempDir, IndexStore, IndexMetadata) {
    let dir = tempdir().unwrap();
    let sources = fixture_sources(dir.path());
    let (store, meta) =
        rebuild_index(&test_config(dir.path()), &sources, &mut LogObserver).unwrap();
    (dir, store, meta)
}

fn start_of(result: rirdex::Result<Row>) -> Option<String> {
    match result {
        Ok(row) => Some(row.start),
        Err(e) if e.is_not_found() => None,
        Err(e) => panic!("unexpected error: {}", e),
    }
}

// ==================== Rebuild ====================

#[test]
fn test_rebuild_counts_and_metadata() {
    let (dir, store, meta) = build();

    let stats = store.stats().unwrap();
    assert_eq!(stats.rows, 9);
    assert_eq!(stats.asn, 1 + 1024 + 8);
    assert_eq!(stats.ipv4, 4);
    assert_eq!(stats.ipv6, 2);
    assert_eq!(stats.associations, 9);
    assert_eq!(stats.as_names, 7);

    assert!(meta.is_complete());
    assert_eq!(meta.rows, 9);
    assert_eq!(meta.failed_lines(), 1);
    let summary: Vec<(&str, u64, u64)> = meta
        .sources
        .iter()
        .map(|s| (s.name.as_str(), s.indexed, s.failed))
        .collect();
    assert_eq!(
        summary,
        [("arin", 5, 1), ("ripencc", 4, 0), ("asnames", 7, 0)]
    );

    let saved = IndexMetadata::load(test_config(dir.path()).metadata_path()).unwrap();
    assert!(saved.is_complete());
    assert_eq!(saved.rows, 9);
}

#[test]
fn test_round_trip_in_load_order() {
    let (_dir, store, _) = build();
    let lines: Vec<String> = store.all_rows().unwrap().iter().map(Row::to_line).collect();
    assert_eq!(lines, INDEXED);
}

#[test]
fn test_filtering() {
    let (_dir, store, _) = build();
    let rows = store.all_rows().unwrap();
    assert!(rows
        .iter()
        .all(|r| r.status == "assigned" || r.status == "allocated"));
    assert!(rows.iter().all(|r| r.start != "203.0.113.0" && r.start != "example"));
    assert!(store.find_by_asn(64496).unwrap_err().is_not_found());
    // Address of the reserved block is not covered
    assert_eq!(start_of(store.find_by_ip_str("203.0.113.5")), None);
}

#[test]
fn test_parse_failure_does_not_stop_the_file() {
    let (_dir, store, _) = build();
    // Rows after the broken line are present
    assert_eq!(
        start_of(store.find_by_ip_str("198.51.100.1")).as_deref(),
        Some("198.51.100.0")
    );
    assert_eq!(
        start_of(store.find_by_ip_str("2001:db8::1")).as_deref(),
        Some("2001:db8::")
    );
    // The broken line consumed no row index
    let mut indices = Vec::new();
    store
        .walk_rows(|ix, _| {
            indices.push(ix.get());
            Ok(())
        })
        .unwrap();
    assert_eq!(indices, (1..=9).collect::<Vec<u32>>());
}

#[test]
fn test_interrupted_rebuild_leaves_no_metadata() {
    let dir = tempdir().unwrap();
    let mut sources = fixture_sources(dir.path());
    sources.insert(1, SourceFile::delegations(Registry::Apnic, dir.path()));
    let config = test_config(dir.path());

    let result = rebuild_index(&config, &sources, &mut LogObserver);
    assert!(matches!(result, Err(Error::Io(_))));
    assert!(!IndexMetadata::load(config.metadata_path()).unwrap().is_complete());
}

#[test]
fn test_gzip_progress_reaches_total() {
    #[derive(Default)]
    struct Last(BTreeMap<String, LoadProgress>);

    impl LoadObserver for Last {
        fn on_progress(&mut self, source: &str, progress: LoadProgress) {
            self.0.insert(source.to_string(), progress);
        }
    }

    let dir = tempdir().unwrap();
    let sources = fixture_sources(dir.path());
    let mut observer = Last::default();
    rebuild_index(&test_config(dir.path()), &sources, &mut observer).unwrap();

    let arin = &observer.0["delegated-arin-extended-latest.txt.gz"];
    assert_eq!(arin.total_bytes, ARIN.len() as u64);
    assert_eq!(arin.bytes_read, ARIN.len() as u64);
    assert_eq!(observer.0["asn.txt.gz"].total_bytes, AS_NAMES.len() as u64);
}

// ==================== ASN lookups ====================

#[test]
fn test_asn_block_coverage() {
    let (_dir, store, _) = build();

    assert_eq!(store.find_by_asn(64500).unwrap().asn(), Some(64500));
    for asn in 64512..64512 + 1024 {
        assert_eq!(store.find_by_asn(asn).unwrap().asn(), Some(64512), "AS{}", asn);
    }
    for asn in 200000..200008 {
        assert_eq!(store.find_by_asn(asn).unwrap().asn(), Some(200000));
    }

    for asn in [64499, 64501, 64511, 65536, 199999, 200008] {
        assert!(store.find_by_asn(asn).unwrap_err().is_not_found(), "AS{}", asn);
    }
}

// ==================== IP lookups ====================

#[test]
fn test_ip_exact_and_interior() {
    let (_dir, store, _) = build();
    for (addr, start) in [
        ("192.0.2.0", "192.0.2.0"),
        ("192.0.2.137", "192.0.2.0"),
        ("192.0.2.255", "192.0.2.0"),
        ("198.51.100.127", "198.51.100.0"),
        ("203.0.113.128", "203.0.113.128"),
        ("203.0.113.191", "203.0.113.128"),
        ("233.252.1.17", "233.252.0.0"),
        ("2001:db8::", "2001:db8::"),
        ("2001:db8:abcd::1", "2001:db8::"),
    ] {
        assert_eq!(
            start_of(store.find_by_ip_str(addr)).as_deref(),
            Some(start),
            "{}",
            addr
        );
    }
}

#[test]
fn test_ip_gaps() {
    let (_dir, store, _) = build();
    for addr in [
        "10.0.0.1",
        "192.0.3.0",
        "198.51.100.128",
        "203.0.113.192",
        "2001:db9::",
        "::1",
    ] {
        assert_eq!(start_of(store.find_by_ip_str(addr)), None, "{}", addr);
    }
}

#[test]
fn test_ip_beyond_last_start() {
    let (_dir, store, _) = build();
    // Inside the highest block
    assert_eq!(
        start_of(store.find_by_ip_str("233.252.2.200")).as_deref(),
        Some("233.252.0.0")
    );
    assert_eq!(
        start_of(store.find_by_ip_str("3fff:fff::1")).as_deref(),
        Some("3fff::")
    );
    // Past the highest block
    assert_eq!(start_of(store.find_by_ip_str("233.252.3.0")), None);
    assert_eq!(start_of(store.find_by_ip_str("255.255.255.255")), None);
    assert_eq!(start_of(store.find_by_ip_str("3fff:1000::")), None);
}

#[test]
fn test_ip_invalid_literal() {
    let (_dir, store, _) = build();
    assert!(matches!(
        store.find_by_ip_str("192.0.2"),
        Err(Error::InvalidAddress(_))
    ));
}

#[test]
fn test_ip_on_empty_store() {
    let dir = tempdir().unwrap();
    let config = test_config(dir.path());
    let store = IndexStore::open(config.store_path(), &config).unwrap();
    assert!(store.find_by_ip_str("192.0.2.1").unwrap_err().is_not_found());
    assert!(store.find_by_asn(1).unwrap_err().is_not_found());
    assert!(store.all_rows().unwrap().is_empty());
}

// ==================== Associations ====================

#[test]
fn test_association_symmetry() {
    let (_dir, store, _) = build();
    let rows = store.all_rows().unwrap();

    for a in &rows {
        let associated: Vec<String> = store
            .associated(a)
            .unwrap()
            .iter()
            .map(Row::to_line)
            .collect();
        for b in &rows {
            let same_org = a.org_key().is_some() && a.org_key() == b.org_key();
            assert_eq!(
                associated.contains(&b.to_line()),
                same_org,
                "{} / {}",
                a,
                b
            );
        }
    }
}

#[test]
fn test_association_sets() {
    let (_dir, store, _) = build();
    let count = |org: &str, registry: &str| store.find_associated(registry, org).unwrap().len();
    assert_eq!(count("ORG-ALPHA", "arin"), 4);
    assert_eq!(count("ORG-BRAVO", "arin"), 1);
    assert_eq!(count("ORG-CHARLIE", "ripencc"), 4);
    assert_eq!(count("ORG-CHARLIE", "arin"), 0);
}

// ==================== Scans ====================

#[test]
fn test_name_scan_dedup() {
    let (_dir, store, _) = build();

    let rows = store.find_by_name("alpha-block").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].asn(), Some(64512));

    let rows = store.find_by_name("ALPHA").unwrap();
    let asns: Vec<Option<u32>> = rows.iter().map(Row::asn).collect();
    assert_eq!(asns, [Some(64500), Some(64512)]);

    assert_eq!(store.find_by_name("charlie").unwrap().len(), 1);
    assert!(store.find_by_name("nobody").unwrap().is_empty());
}

#[test]
fn test_country_scan() {
    let (_dir, store, _) = build();
    let starts: Vec<String> = store
        .find_by_country("NL")
        .unwrap()
        .into_iter()
        .map(|r| r.start)
        .collect();
    assert_eq!(starts, ["203.0.113.128", "233.252.0.0"]);
    assert_eq!(store.find_by_country("US").unwrap().len(), 5);
    assert!(store.find_by_country("FR").unwrap().is_empty());
}

// ==================== Query grammar ====================

#[test]
fn test_query_with_associations() {
    let (_dir, store, _) = build();

    for text in ["na alpha +", "ip 192.0.2.1 +", "as 64600 +"] {
        let rows = Query::parse(text).unwrap().run(&store).unwrap();
        let starts: Vec<&str> = rows.iter().map(|r| r.start.as_str()).collect();
        assert_eq!(starts, ["192.0.2.0", "2001:db8::", "64500", "64512"], "{}", text);
        assert_eq!(
            rows[2].as_name.as_deref(),
            Some("ALPHA-AS Alpha Hosting, US")
        );
    }
}

#[test]
fn test_query_results_and_errors() {
    let (_dir, store, _) = build();
    let run = |text: &str| Query::parse(text).and_then(|q| q.run(&store));

    assert_eq!(run("as 200003").unwrap().len(), 1);
    assert_eq!(run("cc nl").unwrap().len(), 2);
    assert_eq!(run("all").unwrap().len(), 9);
    assert!(run("cc FR").unwrap_err().is_not_found());
    assert!(run("ip 203.0.113.5").unwrap_err().is_not_found());
    assert!(run("na nobody").unwrap_err().is_not_found());
    assert!(matches!(run("ip 1.2.3.400"), Err(Error::InvalidAddress(_))));
    assert!(matches!(run("bogus"), Err(Error::InvalidQuery(_))));
}

// ==================== Idempotence and concurrency ====================

fn fingerprint(store: &IndexStore) -> Vec<String> {
    let mut out = Vec::new();
    for asn in [64500, 64513, 65535, 200007, 1] {
        out.push(format!("{:?}", store.find_by_asn(asn).map(|r| r.to_line()).ok()));
    }
    for addr in ["192.0.2.9", "198.51.100.200", "233.252.2.1", "2001:db8::5", "3fff::"] {
        out.push(format!("{:?}", store.find_by_ip_str(addr).map(|r| r.to_line()).ok()));
    }
    for (registry, org) in [("arin", "ORG-ALPHA"), ("ripencc", "ORG-CHARLIE")] {
        for row in store.find_associated(registry, org).unwrap() {
            out.push(row.to_line());
        }
    }
    out
}

#[test]
fn test_idempotent_rebuild() {
    let (_dir_a, store_a, _) = build();
    let (_dir_b, store_b, _) = build();
    assert_eq!(fingerprint(&store_a), fingerprint(&store_b));

    // Rebuilding over an existing index in the same directory
    let dir = tempdir().unwrap();
    let sources = fixture_sources(dir.path());
    let config = test_config(dir.path());
    let first = {
        let (store, _) = rebuild_index(&config, &sources, &mut LogObserver).unwrap();
        fingerprint(&store)
    };
    let (store, _) = rebuild_index(&config, &sources, &mut LogObserver).unwrap();
    assert_eq!(fingerprint(&store), first);
    assert_eq!(first, fingerprint(&store_a));
    assert_eq!(store.stats().unwrap().rows, 9);
}

#[test]
fn test_concurrent_reads() {
    let (_dir, store, _) = build();
    let store = &store;

    std::thread::scope(|scope| {
        for t in 0..8u32 {
            scope.spawn(move || {
                for i in 0..200u32 {
                    let asn = 64512 + (t * 200 + i) % 1024;
                    assert_eq!(store.find_by_asn(asn).unwrap().asn(), Some(64512));
                    let addr = format!("192.0.2.{}", (t + i) % 256);
                    assert_eq!(store.find_by_ip_str(&addr).unwrap().start, "192.0.2.0");
                }
            });
        }
    });
}
