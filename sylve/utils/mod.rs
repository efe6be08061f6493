#[cfg(test)]
pub mod testing;

pub mod codec;

#[cfg(test)]
pub mod stream;
