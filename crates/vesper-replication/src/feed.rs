//! Encodes an applied write command for the replica feed (spec §4.8: "feed
//! every applied write command to all ONLINE replicas... prefix with
//! `SELECT <dbid>` when the tracked per-replica DB changes"). The same
//! shape as `vesper_persistence::aof`'s `SELECT`-on-change bookkeeping,
//! kept separate since each replica tracks its own last-selected DB
//! independently rather than sharing one AOF-wide cursor.

use vesper_types::DbIndex;
use vesper_wire::encode_multibulk;

/// Appends `argv`, prefixed with `SELECT <db>` if `last_selected` isn't
/// already `db`, to `out`. Updates `last_selected` on the caller's behalf.
pub fn encode_feed_command(db: DbIndex, argv: &[Vec<u8>], last_selected: &mut Option<DbIndex>, out: &mut Vec<u8>) {
    if *last_selected != Some(db) {
        let select = vec![b"SELECT".to_vec(), db.as_u32().to_string().into_bytes()];
        out.extend_from_slice(&encode_multibulk(&select));
        *last_selected = Some(db);
    }
    out.extend_from_slice(&encode_multibulk(argv));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_is_only_emitted_on_db_change() {
        let mut last = None;
        let mut out = Vec::new();
        encode_feed_command(DbIndex::new(0), &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()], &mut last, &mut out);
        encode_feed_command(DbIndex::new(0), &[b"SET".to_vec(), b"k2".to_vec(), b"v".to_vec()], &mut last, &mut out);
        let text = String::from_utf8_lossy(&out);
        assert_eq!(text.matches("SELECT").count(), 1);
    }

    #[test]
    fn select_is_re_emitted_after_db_change() {
        let mut last = Some(DbIndex::new(0));
        let mut out = Vec::new();
        encode_feed_command(DbIndex::new(1), &[b"SET".to_vec(), b"k".to_vec(), b"v".to_vec()], &mut last, &mut out);
        assert_eq!(last, Some(DbIndex::new(1)));
        assert!(String::from_utf8_lossy(&out).contains("SELECT"));
    }
}
