pub fn is_strand_ambiguous(a1: &str, a2: &str) -> bool {
    matches!((a1, a2), ("A", "T") | ("T", "A") | ("C", "G") | ("G", "C"))
}

pub fn is_acgt(allele: &str) -> bool {
    matches!(allele, "A" | "C" | "G" | "T")
}

pub fn complement(allele: &str) -> &str {
    match allele {
        "A" => "T",
        "T" => "A",
        "C" => "G",
        "G" => "C",
        other => other,
    }
}

pub fn same_allele_set(a: (&str, &str), b: (&str, &str)) -> bool {
    (a.0 == b.0 && a.1 == b.1) || (a.0 == b.1 && a.1 == b.0)
}

pub fn allele_sets_intersect(a: (&str, &str), b: (&str, &str)) -> bool {
    a.0 == b.0 || a.0 == b.1 || a.1 == b.0 || a.1 == b.1
}
