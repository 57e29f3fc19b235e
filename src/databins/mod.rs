pub mod databin;
pub mod databins_saver;
