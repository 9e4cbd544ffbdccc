// Priority 1 — building blocks
mod tests_block;

mod tests_scan;
