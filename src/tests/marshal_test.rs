#[cfg(test)]
mod tests {
    use crate::marshal::CStringArray;

    #[test]
    fn builds_from_strings() {
        let argv = CStringArray::new(vec!["/bin/sh", "-c", "exit 0"]).expect("valid argv");
        assert_eq!(argv.len(), 3);
        assert!(!argv.is_empty());
        assert_eq!(argv.as_cstrs()[0].to_str().unwrap(), "/bin/sh");
    }

    #[test]
    fn empty_is_empty() {
        let envp = CStringArray::new(Vec::<String>::new()).expect("empty is valid");
        assert!(envp.is_empty());
        assert_eq!(envp.len(), 0);
    }

    #[test]
    fn rejects_embedded_nul() {
        let result = CStringArray::new(vec!["bad\0value"]);
        assert!(result.is_err());
    }
}
