
#[cfg(test)]
pub mod unit;
