mod expansion_tests;
