/// Rounds `value` up to the next multiple of `alignment`, a power of two.
pub fn aligned_size(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
