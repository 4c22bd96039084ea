//! Process-environment contract
//!
//! A sandboxed program finds its connection through two variables: the
//! descriptor number and the `;`-separated names of the capabilities the
//! connection imports, in import order.
