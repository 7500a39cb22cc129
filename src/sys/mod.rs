pub(crate) mod unix;

pub(crate) use unix as platform;
