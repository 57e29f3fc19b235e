pub mod vbas;
