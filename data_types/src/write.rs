use crate::Point;
use hashbrown::HashSet;

/// An ordered batch of points to write.
#[derive(Debug, Clone, Default)]
pub struct WriteRequest {
    pub points: Vec<Point>,
}

impl WriteRequest {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The distinct tables referenced by this batch.
    pub fn tables(&self) -> HashSet<&str> {
        self.points.iter().map(Point::table).collect()
    }
}

impl From<Vec<Point>> for WriteRequest {
    fn from(points: Vec<Point>) -> Self {
        Self::new(points)
    }
}

/// The success value of a write.
///
/// `tables` is populated only when the client was configured with
/// `collect_wrote_detail`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOk {
    pub success: u32,
    pub failed: u32,
    pub tables: Option<HashSet<String>>,
}

impl WriteOk {
    pub fn new(success: u32, failed: u32, tables: Option<HashSet<String>>) -> Self {
        Self {
            success,
            failed,
            tables,
        }
    }

    /// The result of writing an empty batch.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Additive merge: counts sum, table sets union.
    pub fn combine(mut self, other: Self) -> Self {
        self.success += other.success;
        self.failed += other.failed;
        self.tables = match (self.tables, other.tables) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (a @ Some(_), None) => a,
            (None, b) => b,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(names: &[&str]) -> Option<HashSet<String>> {
        Some(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn combine_is_additive() {
        let a = WriteOk::new(2, 1, tables(&["t1"]));
        let b = WriteOk::new(3, 0, tables(&["t2", "t1"]));

        let got = a.combine(b);
        assert_eq!(got.success, 5);
        assert_eq!(got.failed, 1);
        assert_eq!(got.tables, tables(&["t1", "t2"]));
    }

    #[test]
    fn combine_is_associative_and_commutative_on_counts() {
        let a = WriteOk::new(1, 0, None);
        let b = WriteOk::new(2, 3, None);
        let c = WriteOk::new(4, 5, None);

        let abc = a.clone().combine(b.clone()).combine(c.clone());
        let cab = c.combine(a.combine(b));
        assert_eq!(abc, cab);
    }

    #[test]
    fn combine_keeps_detail_from_either_side() {
        let got = WriteOk::new(1, 0, None).combine(WriteOk::new(1, 0, tables(&["t"])));
        assert_eq!(got.tables, tables(&["t"]));

        let got = WriteOk::new(1, 0, tables(&["t"])).combine(WriteOk::new(1, 0, None));
        assert_eq!(got.tables, tables(&["t"]));
    }

    #[test]
    fn request_tables_are_distinct() {
        let points = vec![
            Point::builder("a").timestamp(1).field("f", 1_i64).build().unwrap(),
            Point::builder("b").timestamp(2).field("f", 2_i64).build().unwrap(),
            Point::builder("a").timestamp(3).field("f", 3_i64).build().unwrap(),
        ];
        let req = WriteRequest::new(points);
        assert_eq!(req.tables().len(), 2);
    }
}
